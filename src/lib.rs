//! In-place video compressor library
//!
//! Decodes a source video, re-encodes it to H.264 video and AAC-LC audio at a
//! fixed quality tier, muxes the result into an MP4 and replaces the original
//! file with it. The transcode pipeline lives in [`engine`] and is generic over
//! a [`ports::CodecBackend`]; [`adapters::libav`] drives FFmpeg and
//! [`adapters::mock`] is a scripted backend for tests.

pub mod adapters;
pub mod app;
pub mod cli;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ports;

// Re-export commonly used types
pub use app::{CompressInteractor, Compressor, JobHandle};
pub use domain::model::{JobReport, QualityProfile, QualityTier, TranscodeRequest};
pub use error::{CompressError, CompressResult};
