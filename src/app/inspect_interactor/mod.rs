// Inspect interactor - Lists a source's tracks and the ones a job would use

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::adapters::fs_local::LocalFs;
use crate::domain::model::*;
use crate::engine::lifecycle::Guarded;
use crate::engine::selector::select_track;
use crate::error::{CompressError, CompressResult, Stage};
use crate::ports::*;

/// Track listing of one source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectReport {
    pub source: PathBuf,
    pub size: u64,
    pub tracks: Vec<TrackInfo>,
    /// Track a compression job would transcode as video
    pub video_track: Option<usize>,
    pub audio_track: Option<usize>,
}

impl InspectReport {
    /// Whether a compression job would accept this source
    pub fn is_compressible(&self) -> bool {
        self.video_track.is_some()
    }
}

/// Interactor for source inspection
pub struct InspectInteractor<B: CodecBackend> {
    backend: Arc<B>,
    fs: LocalFs,
}

impl<B: CodecBackend> InspectInteractor<B> {
    pub fn new(backend: Arc<B>, fs: LocalFs) -> Self {
        Self { backend, fs }
    }

    pub fn inspect(&self, source: &str) -> CompressResult<InspectReport> {
        let path = PathBuf::from(source);
        let size = self.fs.check_source(&path)?;

        let demuxer = Guarded::new(Stage::VideoDemuxer, self.backend.open_demuxer(&path)?);
        let reader = demuxer.get()?;
        let tracks = (0..reader.track_count()?)
            .map(|index| reader.track_info(index))
            .collect::<CompressResult<Vec<_>>>()?;
        let video_track = select_track(reader, MediaKind::Video)?;
        let audio_track = select_track(reader, MediaKind::Audio)?;

        info!(source, tracks = tracks.len(), ?video_track, ?audio_track, "source inspected");
        Ok(InspectReport {
            source: path,
            size,
            tracks,
            video_track,
            audio_track,
        })
    }

    pub fn format_as_json(&self, report: &InspectReport) -> CompressResult<String> {
        serde_json::to_string_pretty(report).map_err(|e| CompressError::Worker {
            message: format!("JSON serialization failed: {e}"),
        })
    }

    pub fn format_as_text(&self, report: &InspectReport) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Source: {} ({} bytes)", report.source.display(), report.size);
        for track in &report.tracks {
            let marker = if Some(track.index) == report.video_track || Some(track.index) == report.audio_track {
                "*"
            } else {
                " "
            };
            let _ = write!(out, "{marker} #{} {}", track.index, track.mime);
            if let (Some(w), Some(h)) = (track.width, track.height) {
                let _ = write!(out, " {w}x{h}");
            }
            if let Some(rate) = track.sample_rate {
                let _ = write!(out, " {rate} Hz");
            }
            if let Some(channels) = track.channels {
                let _ = write!(out, " {channels} ch");
            }
            if let Some(duration) = track.known_duration_us() {
                let _ = write!(out, " {:.2}s", duration as f64 / 1_000_000.0);
            }
            out.push('\n');
        }
        if !report.is_compressible() {
            out.push_str("No video track: this file cannot be compressed\n");
        }
        out
    }
}
