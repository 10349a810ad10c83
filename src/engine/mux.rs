//! Output container coordination across track pipelines

use tracing::{debug, info};

use crate::domain::model::{MediaKind, NegotiatedFormat, Sample, TrackReport};
use crate::engine::lifecycle::Guarded;
use crate::error::{CompressError, CompressResult, Stage};
use crate::ports::Muxer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    /// Waiting for every expected track to register
    Collecting,
    Started,
    Stopped,
}

#[derive(Debug)]
struct OutputTrack {
    kind: MediaKind,
    index: usize,
    last_pts_us: Option<i64>,
    ended: bool,
    report: TrackReport,
}

/// Owns the container writer and gates its start on the full track set.
///
/// The expected kinds are fixed up front from what the source offered, so the
/// container starts exactly once, after the last expected track registers,
/// whatever order the encoders negotiate in.
pub struct MuxCoordinator<M: Muxer> {
    muxer: Guarded<M>,
    state: MuxState,
    expected: Vec<MediaKind>,
    tracks: Vec<OutputTrack>,
    start_calls: u32,
}

impl<M: Muxer> MuxCoordinator<M> {
    pub fn new(muxer: M, expected: Vec<MediaKind>) -> Self {
        Self {
            muxer: Guarded::new(Stage::Muxer, muxer),
            state: MuxState::Collecting,
            expected,
            tracks: Vec::new(),
            start_calls: 0,
        }
    }

    pub fn state(&self) -> MuxState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state == MuxState::Started
    }

    /// How many times the underlying container was started
    pub fn start_calls(&self) -> u32 {
        self.start_calls
    }

    pub fn expected_tracks(&self) -> usize {
        self.expected.len()
    }

    pub fn register_track(&mut self, format: &NegotiatedFormat<M::Params>) -> CompressResult<usize> {
        let kind = format.kind();
        if self.state != MuxState::Collecting {
            return Err(CompressError::Muxer {
                message: format!("{kind} track registered after the container started"),
            });
        }
        if !self.expected.contains(&kind) {
            return Err(CompressError::UnexpectedTrack { kind });
        }
        if self.tracks.iter().any(|t| t.kind == kind) {
            return Err(CompressError::TrackAlreadyRegistered { kind });
        }

        let index = self.muxer.get_mut()?.add_track(format)?;
        debug!(%kind, index, codec = %format.summary.codec, "output track registered");
        self.tracks.push(OutputTrack {
            kind,
            index,
            last_pts_us: None,
            ended: false,
            report: TrackReport::default(),
        });
        Ok(index)
    }

    /// Start the container once every expected track has registered.
    /// Returns whether the container is running afterwards.
    pub fn maybe_start(&mut self) -> CompressResult<bool> {
        if self.state == MuxState::Collecting && self.tracks.len() == self.expected.len() {
            self.muxer.start_with(|muxer| muxer.start())?;
            self.start_calls += 1;
            self.state = MuxState::Started;
            info!(tracks = self.tracks.len(), "container started");
        }
        Ok(self.is_started())
    }

    pub fn write_sample(&mut self, index: usize, sample: &Sample) -> CompressResult<()> {
        match self.state {
            MuxState::Collecting => return Err(CompressError::WriteBeforeStart { track: index }),
            MuxState::Stopped => return Err(CompressError::WriteAfterStop { track: index }),
            MuxState::Started => {}
        }

        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.index == index)
            .ok_or_else(|| CompressError::Muxer {
                message: format!("unknown output track {index}"),
            })?;
        if track.ended {
            return Err(CompressError::WriteAfterStop { track: index });
        }
        if let Some(previous) = track.last_pts_us {
            if sample.pts_us < previous {
                return Err(CompressError::NonMonotonicTimestamp {
                    track: index,
                    previous,
                    current: sample.pts_us,
                });
            }
        }

        self.muxer.get_mut()?.write_sample(index, sample)?;
        track.last_pts_us = Some(sample.pts_us);
        track.report.samples_written += 1;
        track.report.bytes_written += sample.data.len() as u64;
        track.report.last_pts_us = Some(sample.pts_us);
        Ok(())
    }

    /// Mark a track's stream complete; later writes to it are rejected
    pub fn end_track(&mut self, index: usize) {
        if let Some(track) = self.tracks.iter_mut().find(|t| t.index == index) {
            if !track.ended {
                debug!(kind = %track.kind, index, "output track ended");
                track.ended = true;
            }
        }
    }

    pub fn all_tracks_ended(&self) -> bool {
        self.tracks.len() == self.expected.len() && self.tracks.iter().all(|t| t.ended)
    }

    pub fn report(&self, kind: MediaKind) -> Option<TrackReport> {
        self.tracks
            .iter()
            .find(|t| t.kind == kind)
            .map(|t| t.report.clone())
    }

    /// Finalize and release the container.
    ///
    /// A container that never started is released without being stopped and
    /// the job fails with [`CompressError::MuxerNeverStarted`].
    pub fn finish(&mut self) -> CompressResult<()> {
        match self.state {
            MuxState::Collecting => {
                self.state = MuxState::Stopped;
                if let Err(e) = self.muxer.close() {
                    debug!(error = %e, "release of unstarted muxer failed");
                }
                Err(CompressError::MuxerNeverStarted)
            }
            MuxState::Started => {
                self.state = MuxState::Stopped;
                self.muxer.close()?;
                info!("container finalized");
                Ok(())
            }
            MuxState::Stopped => Ok(()),
        }
    }
}
