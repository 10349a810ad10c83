// Ports - Codec backend and job notification contracts
//
// Every codec call here is non-blocking or bounded. "Nothing ready" is a
// regular return value (`Submit::Busy`, `*Poll::TryAgainLater`), never an error.

use std::path::Path;
use std::time::Duration;

use crate::domain::model::*;
use crate::error::{CompressError, CompressResult};

/// Native handle with an explicit stop/release lifecycle
pub trait NativeResource {
    /// Stop processing; only called on resources that were started
    fn stop(&mut self) -> CompressResult<()> {
        Ok(())
    }

    /// Free the native handle
    fn release(&mut self) -> CompressResult<()>;
}

/// Outcome of offering input to a codec
#[derive(Debug, Clone, PartialEq)]
pub enum Submit<T> {
    Accepted,
    /// No input slot free; the input is handed back for the next tick
    Busy(T),
}

impl<T> Submit<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Submit::Accepted)
    }
}

/// Container reader positioned on one selected track
pub trait Demuxer: NativeResource {
    fn track_count(&self) -> CompressResult<usize>;

    fn track_info(&self, index: usize) -> CompressResult<TrackInfo>;

    /// Restrict `read_sample` to a single track
    fn select_track(&mut self, index: usize) -> CompressResult<()>;

    /// Next compressed sample of the selected track, `None` at end of input
    fn read_sample(&mut self) -> CompressResult<Option<Sample>>;
}

/// Input accepted by a decoder
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderInput {
    Sample(Sample),
    EndOfStream,
}

/// One decoded output unit
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedBuffer {
    pub pts_us: i64,
    /// Decoded payload size; zero for empty end-of-stream buffers
    pub size: usize,
    pub end_of_stream: bool,
    /// Interleaved signed 16-bit PCM for audio, empty for surface-rendered video
    pub pcm: Vec<u8>,
}

/// Result of polling a decoder
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderPoll {
    TryAgainLater,
    FormatChanged,
    Buffer(DecodedBuffer),
}

pub trait Decoder: NativeResource {
    fn start(&mut self) -> CompressResult<()>;

    fn submit(&mut self, input: DecoderInput) -> CompressResult<Submit<DecoderInput>>;

    fn poll_output(&mut self) -> CompressResult<DecoderPoll>;

    /// Return the last polled buffer; `render` pushes a video frame to the surface
    fn release_output(&mut self, render: bool) -> CompressResult<()>;
}

/// Input explicitly pushed to an encoder
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderInput {
    Pcm { data: Vec<u8>, pts_us: i64 },
    EndOfStream { pts_us: i64 },
}

/// Result of polling an encoder
#[derive(Debug, Clone)]
pub enum EncoderPoll<P> {
    TryAgainLater,
    /// Finalized output format, reported once before the first sample
    FormatChanged(NegotiatedFormat<P>),
    Sample(Sample),
}

/// Frame surface a video decoder renders into and a video encoder reads from
pub trait InputSurface: NativeResource {}

pub trait Encoder: NativeResource {
    type Params;
    type Surface: InputSurface;

    /// Surface feeding this encoder; must be created before `start`
    fn create_input_surface(&mut self) -> CompressResult<Self::Surface>;

    fn start(&mut self) -> CompressResult<()>;

    /// Largest PCM chunk one submit accepts
    fn input_capacity(&self) -> usize;

    /// Offer input, waiting at most `wait` for a free slot
    fn submit(&mut self, input: EncoderInput, wait: Duration) -> CompressResult<Submit<EncoderInput>>;

    /// End of input for surface-fed encoders
    fn signal_end_of_input_stream(&mut self) -> CompressResult<()>;

    fn poll_output(&mut self) -> CompressResult<EncoderPoll<Self::Params>>;
}

/// Output container writer
pub trait Muxer: NativeResource {
    type Params;

    fn add_track(&mut self, format: &NegotiatedFormat<Self::Params>) -> CompressResult<usize>;

    fn start(&mut self) -> CompressResult<()>;

    fn write_sample(&mut self, track: usize, sample: &Sample) -> CompressResult<()>;
}

/// Factory for every native resource a job opens
pub trait CodecBackend: Send + Sync + 'static {
    type Params;
    type Demuxer: Demuxer;
    type Surface: InputSurface;
    type Decoder: Decoder;
    type Encoder: Encoder<Params = Self::Params, Surface = Self::Surface>;
    type Muxer: Muxer<Params = Self::Params>;

    fn open_demuxer(&self, source: &Path) -> CompressResult<Self::Demuxer>;

    /// Configured H.264 encoder, not yet started
    fn create_video_encoder(&self, settings: &VideoEncoderSettings) -> CompressResult<Self::Encoder>;

    /// Configured AAC-LC encoder, not yet started
    fn create_audio_encoder(&self, settings: &AudioEncoderSettings) -> CompressResult<Self::Encoder>;

    /// Configured decoder for `track`; video decoders render into `surface`
    fn create_decoder(
        &self,
        demuxer: &Self::Demuxer,
        track: usize,
        surface: Option<&Self::Surface>,
    ) -> CompressResult<Self::Decoder>;

    fn create_muxer(&self, destination: &Path) -> CompressResult<Self::Muxer>;
}

/// Caller-facing job callbacks
pub trait JobObserver: Send + Sync {
    fn on_progress(&self, percent: u8);

    fn on_success(&self, report: &JobReport);

    fn on_error(&self, error: &CompressError);
}

/// Where the pipeline publishes progress while it runs
pub trait ProgressSink {
    fn publish(&self, percent: u8);
}

/// Sink that drops progress, for callers that only want the result
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn publish(&self, _percent: u8) {}
}
