//! Error handling for the compressor
//!
//! Every failure a job can hit is a [`CompressError`]. Transient codec
//! unavailability is never represented here; stages model it as a
//! "try again next tick" poll result instead.

use std::fmt;
use thiserror::Error;

use crate::domain::model::MediaKind;

/// Pipeline component that owns a native codec or container handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    VideoDemuxer,
    AudioDemuxer,
    VideoDecoder,
    AudioDecoder,
    VideoEncoder,
    AudioEncoder,
    InputSurface,
    Muxer,
}

impl Stage {
    /// Demuxer stage reading tracks of the given kind
    pub fn demuxer(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Video => Stage::VideoDemuxer,
            MediaKind::Audio => Stage::AudioDemuxer,
        }
    }

    /// Decoder stage for the given kind
    pub fn decoder(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Video => Stage::VideoDecoder,
            MediaKind::Audio => Stage::AudioDecoder,
        }
    }

    /// Encoder stage for the given kind
    pub fn encoder(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Video => Stage::VideoEncoder,
            MediaKind::Audio => Stage::AudioEncoder,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::VideoDemuxer => "video demuxer",
            Stage::AudioDemuxer => "audio demuxer",
            Stage::VideoDecoder => "video decoder",
            Stage::AudioDecoder => "audio decoder",
            Stage::VideoEncoder => "video encoder",
            Stage::AudioEncoder => "audio encoder",
            Stage::InputSurface => "input surface",
            Stage::Muxer => "muxer",
        };
        f.write_str(name)
    }
}

/// Broad failure classes reported alongside the error message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or unusable source, rejected before any codec exists
    Input,
    /// A decoder or encoder could not be configured, started or driven
    CodecNegotiation,
    /// Container writes out of order or a container that never started
    MuxerState,
    /// The pipeline stopped making progress
    Stalled,
    /// Temp output or in-place replacement failed
    FileSystem,
    /// Configuration could not be loaded
    Configuration,
    /// Worker or bookkeeping failure
    Internal,
}

/// Main error type for compressor operations
#[derive(Error, Debug)]
pub enum CompressError {
    /// No source path was supplied
    #[error("Must provide a 'path' to the video file.")]
    MissingPath,

    /// Source path does not exist
    #[error("Original file does not exist at path: {path}")]
    SourceNotFound { path: String },

    /// Source exists but cannot be opened as a media container
    #[error("Source is not readable media ({path}): {message}")]
    SourceUnreadable { path: String, message: String },

    /// Source has no video track to compress
    #[error("No video track found in {path}")]
    NoVideoTrack { path: String },

    /// Codec or container failed to configure or start
    #[error("Failed to configure {stage}: {message}")]
    CodecConfiguration { stage: Stage, message: String },

    /// Codec failed while processing data
    #[error("{stage} failed: {message}")]
    Codec { stage: Stage, message: String },

    /// A second negotiated format arrived for a track that already has one
    #[error("{kind} track registered twice with the muxer")]
    TrackAlreadyRegistered { kind: MediaKind },

    /// A track arrived that the job never selected
    #[error("Unexpected {kind} track registered with the muxer")]
    UnexpectedTrack { kind: MediaKind },

    /// Sample written before the container started
    #[error("Sample for track {track} written before the muxer started")]
    WriteBeforeStart { track: usize },

    /// Sample written after the container stopped
    #[error("Sample for track {track} written after the muxer stopped")]
    WriteAfterStop { track: usize },

    /// Sample timestamps went backwards within one track
    #[error("Track {track} timestamp went backwards: {previous}us then {current}us")]
    NonMonotonicTimestamp {
        track: usize,
        previous: i64,
        current: i64,
    },

    /// The container was never started so there is nothing to finalize
    #[error("no tracks were ever finalized")]
    MuxerNeverStarted,

    /// Container writer failure
    #[error("Muxer error: {message}")]
    Muxer { message: String },

    /// No stage made progress for too long
    #[error("Pipeline stalled after {ticks} idle ticks")]
    Stalled { ticks: u64 },

    /// A handle was used after it had been released
    #[error("{resource} used after release")]
    ResourceReleased { resource: String },

    /// Replacing the source with the compressed output failed
    #[error("Failed to replace source with compressed output: {message}")]
    Replace { message: String },

    /// Configuration loading error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Job worker failure
    #[error("Worker error: {message}")]
    Worker { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// FFmpeg error
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
}

impl CompressError {
    /// Configuration failure attributed to a stage
    pub fn configure(stage: Stage, err: impl fmt::Display) -> Self {
        CompressError::CodecConfiguration {
            stage,
            message: err.to_string(),
        }
    }

    /// Runtime codec failure attributed to a stage
    pub fn codec(stage: Stage, err: impl fmt::Display) -> Self {
        CompressError::Codec {
            stage,
            message: err.to_string(),
        }
    }

    /// Failure class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompressError::MissingPath
            | CompressError::SourceNotFound { .. }
            | CompressError::SourceUnreadable { .. }
            | CompressError::NoVideoTrack { .. } => ErrorKind::Input,
            CompressError::CodecConfiguration { .. }
            | CompressError::Codec { .. }
            | CompressError::Ffmpeg(_) => ErrorKind::CodecNegotiation,
            CompressError::TrackAlreadyRegistered { .. }
            | CompressError::UnexpectedTrack { .. }
            | CompressError::WriteBeforeStart { .. }
            | CompressError::WriteAfterStop { .. }
            | CompressError::NonMonotonicTimestamp { .. }
            | CompressError::MuxerNeverStarted
            | CompressError::Muxer { .. } => ErrorKind::MuxerState,
            CompressError::Stalled { .. } => ErrorKind::Stalled,
            CompressError::Replace { .. } | CompressError::Io(_) => ErrorKind::FileSystem,
            CompressError::Config { .. } => ErrorKind::Configuration,
            CompressError::ResourceReleased { .. } | CompressError::Worker { .. } => {
                ErrorKind::Internal
            }
        }
    }
}

/// Result type alias for compressor operations
pub type CompressResult<T> = std::result::Result<T, CompressError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_messages_match_plugin_contract() {
        assert_eq!(
            CompressError::MissingPath.to_string(),
            "Must provide a 'path' to the video file."
        );
        let err = CompressError::SourceNotFound {
            path: "/tmp/a.mp4".into(),
        };
        assert_eq!(
            err.to_string(),
            "Original file does not exist at path: /tmp/a.mp4"
        );
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn test_stage_named_in_codec_errors() {
        let err = CompressError::configure(Stage::AudioEncoder, "no aac");
        assert_eq!(err.to_string(), "Failed to configure audio encoder: no aac");
        assert_eq!(err.kind(), ErrorKind::CodecNegotiation);
    }

    #[test]
    fn test_muxer_state_kind() {
        assert_eq!(CompressError::MuxerNeverStarted.kind(), ErrorKind::MuxerState);
        assert_eq!(
            CompressError::WriteBeforeStart { track: 0 }.kind(),
            ErrorKind::MuxerState
        );
    }
}
