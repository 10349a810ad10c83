//! Progress computation and ordered job notifications

use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::domain::model::JobReport;
use crate::domain::rules::{self, COMPLETE_PERCENT};
use crate::error::CompressError;
use crate::ports::{JobObserver, ProgressSink};

/// Turns fed presentation timestamps into a non-decreasing percentage.
///
/// Video progress is measured against the video duration (falling back to the
/// longest track, then to 1). Audio only contributes when the longest track
/// duration is known. The reported value is the maximum of both.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    video_denominator: i64,
    total_duration_us: Option<i64>,
    video: u8,
    audio: u8,
    reported: Option<u8>,
}

impl ProgressTracker {
    pub fn new(video_duration_us: Option<i64>, total_duration_us: Option<i64>) -> Self {
        Self {
            video_denominator: rules::video_progress_denominator(video_duration_us, total_duration_us),
            total_duration_us: total_duration_us.filter(|d| *d > 0),
            video: 0,
            audio: 0,
            reported: None,
        }
    }

    /// Initial 0% report
    pub fn begin(&mut self) -> Option<u8> {
        self.advance()
    }

    pub fn observe_video(&mut self, pts_us: i64) -> Option<u8> {
        self.video = self
            .video
            .max(rules::progress_percent(pts_us, self.video_denominator));
        self.advance()
    }

    pub fn observe_audio(&mut self, pts_us: i64) -> Option<u8> {
        let Some(total) = self.total_duration_us else {
            return None;
        };
        self.audio = self.audio.max(rules::progress_percent(pts_us, total));
        self.advance()
    }

    pub fn current(&self) -> u8 {
        self.video.max(self.audio)
    }

    /// New value to publish, if it moved forward
    fn advance(&mut self) -> Option<u8> {
        let current = self.current();
        match self.reported {
            Some(last) if current <= last => None,
            _ => {
                self.reported = Some(current);
                Some(current)
            }
        }
    }
}

struct NotifierState {
    last_progress: Option<u8>,
    finished: bool,
}

/// Delivers one job's callbacks in order.
///
/// Progress is forwarded only when it increases, 100 at most once, and
/// nothing is forwarded after the single terminal success or error.
pub struct JobNotifier {
    observer: Box<dyn JobObserver>,
    state: Mutex<NotifierState>,
}

impl JobNotifier {
    pub fn new(observer: Box<dyn JobObserver>) -> Self {
        Self {
            observer,
            state: Mutex::new(NotifierState {
                last_progress: None,
                finished: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, NotifierState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn progress(&self, percent: u8) {
        let percent = percent.min(COMPLETE_PERCENT);
        let mut state = self.state();
        if state.finished {
            debug!(percent, "progress after terminal event dropped");
            return;
        }
        if state.last_progress.is_some_and(|last| percent <= last) {
            return;
        }
        state.last_progress = Some(percent);
        self.observer.on_progress(percent);
    }

    /// Force the final 100% report unless it was already sent
    pub fn complete(&self) {
        self.progress(COMPLETE_PERCENT);
    }

    pub fn succeed(&self, report: &JobReport) -> bool {
        let mut state = self.state();
        if state.finished {
            warn!("second terminal event suppressed");
            return false;
        }
        state.finished = true;
        self.observer.on_success(report);
        true
    }

    pub fn fail(&self, error: &CompressError) -> bool {
        let mut state = self.state();
        if state.finished {
            warn!(error = %error, "second terminal event suppressed");
            return false;
        }
        state.finished = true;
        self.observer.on_error(error);
        true
    }

    pub fn is_finished(&self) -> bool {
        self.state().finished
    }

    pub fn last_progress(&self) -> Option<u8> {
        self.state().last_progress
    }
}

impl ProgressSink for JobNotifier {
    fn publish(&self, percent: u8) {
        self.progress(percent);
    }
}
