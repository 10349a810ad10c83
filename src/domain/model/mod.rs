// Domain models - Core business entities and value objects

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Compression quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    #[default]
    High,
}

impl QualityTier {
    /// All tiers from smallest to largest output
    pub const ALL: [QualityTier; 3] = [QualityTier::Low, QualityTier::Medium, QualityTier::High];

    /// Parse a tier name, falling back to `High` for anything unrecognized
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => QualityTier::Low,
            "medium" => QualityTier::Medium,
            _ => QualityTier::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
        }
    }
}

impl FromStr for QualityTier {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(QualityTier::parse(s))
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target output parameters for one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityProfile {
    pub tier: QualityTier,
    pub width: u32,
    pub height: u32,
    /// Video bitrate in bits per second
    pub video_bitrate: u32,
    /// Audio bitrate in bits per second
    pub audio_bitrate: u32,
}

impl QualityProfile {
    /// Resolve the fixed output table entry for a tier
    pub const fn for_tier(tier: QualityTier) -> Self {
        match tier {
            QualityTier::Low => QualityProfile {
                tier,
                width: 640,
                height: 480,
                video_bitrate: 500_000,
                audio_bitrate: 64_000,
            },
            QualityTier::Medium => QualityProfile {
                tier,
                width: 960,
                height: 540,
                video_bitrate: 1_000_000,
                audio_bitrate: 96_000,
            },
            QualityTier::High => QualityProfile {
                tier,
                width: 1280,
                height: 720,
                video_bitrate: 2_000_000,
                audio_bitrate: 128_000,
            },
        }
    }

    /// Resolve straight from a caller-supplied quality string
    pub fn resolve(quality: &str) -> Self {
        Self::for_tier(QualityTier::parse(quality))
    }
}

/// Elementary stream media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Mime type prefix used for track matching
    pub fn mime_prefix(&self) -> &'static str {
        match self {
            MediaKind::Video => "video/",
            MediaKind::Audio => "audio/",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => f.write_str("video"),
            MediaKind::Audio => f.write_str("audio"),
        }
    }
}

/// Description of one source track as reported by a demuxer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub index: usize,
    /// Mime style identifier, e.g. `video/avc` or `audio/mp4a-latm`
    pub mime: String,
    /// Duration in microseconds, absent when the container does not say
    pub duration_us: Option<i64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl TrackInfo {
    /// Whether the mime type belongs to the given media kind
    pub fn is(&self, kind: MediaKind) -> bool {
        self.mime.starts_with(kind.mime_prefix())
    }

    pub fn kind(&self) -> Option<MediaKind> {
        [MediaKind::Video, MediaKind::Audio]
            .into_iter()
            .find(|kind| self.is(*kind))
    }

    /// Positive duration, ignoring zero and negative placeholders
    pub fn known_duration_us(&self) -> Option<i64> {
        self.duration_us.filter(|d| *d > 0)
    }
}

/// Flags carried by a compressed sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFlags {
    pub key_frame: bool,
    pub codec_config: bool,
    pub end_of_stream: bool,
}

impl SampleFlags {
    pub const KEY_FRAME: SampleFlags = SampleFlags {
        key_frame: true,
        codec_config: false,
        end_of_stream: false,
    };

    pub const CODEC_CONFIG: SampleFlags = SampleFlags {
        key_frame: false,
        codec_config: true,
        end_of_stream: false,
    };

    pub const END_OF_STREAM: SampleFlags = SampleFlags {
        key_frame: false,
        codec_config: false,
        end_of_stream: true,
    };
}

/// Compressed access unit
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds
    pub pts_us: i64,
    /// Decode timestamp in microseconds when it differs from pts
    pub dts_us: Option<i64>,
    pub flags: SampleFlags,
}

impl Sample {
    pub fn new(data: Vec<u8>, pts_us: i64) -> Self {
        Self {
            data,
            pts_us,
            dts_us: None,
            flags: SampleFlags::default(),
        }
    }

    pub fn with_flags(mut self, flags: SampleFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Empty end-of-stream marker
    pub fn end_of_stream(pts_us: i64) -> Self {
        Self::new(Vec::new(), pts_us).with_flags(SampleFlags::END_OF_STREAM)
    }

    /// Payload size handed to the muxer; codec-config data never reaches it
    pub fn mux_size(&self) -> usize {
        if self.flags.codec_config {
            0
        } else {
            self.data.len()
        }
    }
}

/// Backend independent view of an encoder's finalized output format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatSummary {
    pub kind: MediaKind,
    pub codec: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub bitrate: u32,
}

/// Finalized encoder output format plus the backend's own codec parameters
#[derive(Debug, Clone)]
pub struct NegotiatedFormat<P> {
    pub summary: FormatSummary,
    pub params: P,
}

impl<P> NegotiatedFormat<P> {
    pub fn kind(&self) -> MediaKind {
        self.summary.kind
    }
}

/// H.264 encoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoEncoderSettings {
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub frame_rate: u32,
    pub i_frame_interval_secs: u32,
    pub preset: String,
    pub threads: usize,
}

impl VideoEncoderSettings {
    /// Frames between forced key frames
    pub fn gop_size(&self) -> u32 {
        self.frame_rate.saturating_mul(self.i_frame_interval_secs).max(1)
    }
}

/// AAC-LC encoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioEncoderSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
}

impl AudioEncoderSettings {
    pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Mirror the source track's rate and layout, defaulting when unknown.
    /// Multichannel sources are downmixed to stereo.
    pub fn for_source(track: &TrackInfo, bitrate: u32) -> Self {
        Self {
            sample_rate: track
                .sample_rate
                .filter(|r| *r > 0)
                .unwrap_or(Self::DEFAULT_SAMPLE_RATE),
            channels: track
                .channels
                .filter(|c| *c > 0)
                .map(|c| c.min(2))
                .unwrap_or(Self::DEFAULT_CHANNELS),
            bitrate,
        }
    }

    /// Bytes per interleaved 16-bit PCM frame
    pub fn bytes_per_frame(&self) -> usize {
        2 * self.channels as usize
    }
}

/// One compression job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeRequest {
    pub source: PathBuf,
    /// Temporary output, moved over `source` once complete
    pub destination: PathBuf,
    pub tier: QualityTier,
}

impl TranscodeRequest {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, tier: QualityTier) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            tier,
        }
    }

    pub fn profile(&self) -> QualityProfile {
        QualityProfile::for_tier(self.tier)
    }
}

/// Per-track muxing totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackReport {
    pub samples_written: u64,
    pub bytes_written: u64,
    pub last_pts_us: Option<i64>,
}

/// What the pipeline produced for one job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscodeSummary {
    pub video: TrackReport,
    pub audio: Option<TrackReport>,
    pub ticks: u64,
}

/// Final outcome of a successful job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub source: PathBuf,
    pub profile: QualityProfile,
    pub summary: TranscodeSummary,
    pub original_size: u64,
    pub compressed_size: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Compressed size as a percentage of the original
    pub fn size_ratio_percent(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        self.compressed_size as f64 * 100.0 / self.original_size as f64
    }
}

#[cfg(test)]
mod tests;
