// Mock codec backend - Scripted in-memory demuxer, codecs and container
//
// Sources are registered by path. Decoders and encoders keep bounded input
// queues so back-pressure and "try again later" paths are exercised, every
// native call is recorded in a shared ResourceLog, and faults can be injected
// at creation, start, stop, release or sample-write time. The muxer writes a
// JSON description of the container on stop so tests can inspect the output.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::domain::model::*;
use crate::error::{CompressError, CompressResult, Stage};
use crate::ports::*;

/// Decoded PCM frames produced per compressed audio sample
pub const MOCK_AUDIO_FRAMES_PER_PACKET: usize = 1024;

/// One track of a registered source
#[derive(Debug, Clone)]
pub struct MockTrack {
    pub info: TrackInfo,
    pub samples: Vec<Sample>,
}

impl MockTrack {
    /// H.264 track with a key frame every second
    pub fn h264(duration_us: i64, fps: u32, width: u32, height: u32) -> Self {
        let frames = (duration_us * fps as i64 / 1_000_000).max(0);
        let samples = (0..frames)
            .map(|i| {
                let sample = Sample::new(vec![0x65; 64], i * 1_000_000 / fps as i64);
                if i % fps as i64 == 0 {
                    sample.with_flags(SampleFlags::KEY_FRAME)
                } else {
                    sample
                }
            })
            .collect();
        Self {
            info: TrackInfo {
                index: 0,
                mime: "video/avc".into(),
                duration_us: Some(duration_us),
                sample_rate: None,
                channels: None,
                width: Some(width),
                height: Some(height),
            },
            samples,
        }
    }

    /// AAC track, one compressed packet per 1024 PCM frames
    pub fn aac(duration_us: i64, sample_rate: u32, channels: u16) -> Self {
        let packets = duration_us * sample_rate as i64 / 1_000_000 / MOCK_AUDIO_FRAMES_PER_PACKET as i64;
        let samples = (0..packets)
            .map(|i| {
                Sample::new(
                    vec![0x21; 32],
                    i * MOCK_AUDIO_FRAMES_PER_PACKET as i64 * 1_000_000 / sample_rate as i64,
                )
            })
            .collect();
        Self {
            info: TrackInfo {
                index: 0,
                mime: "audio/mp4a-latm".into(),
                duration_us: Some(duration_us),
                sample_rate: Some(sample_rate),
                channels: Some(channels),
                width: None,
                height: None,
            },
            samples,
        }
    }

    /// Track the pipeline should ignore
    pub fn subtitles() -> Self {
        Self {
            info: TrackInfo {
                index: 0,
                mime: "text/vtt".into(),
                duration_us: None,
                sample_rate: None,
                channels: None,
                width: None,
                height: None,
            },
            samples: Vec::new(),
        }
    }

    pub fn without_duration(mut self) -> Self {
        self.info.duration_us = None;
        self
    }
}

/// A registered source file
#[derive(Debug, Clone, Default)]
pub struct MockMedia {
    pub tracks: Vec<MockTrack>,
}

impl MockMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(mut self, mut track: MockTrack) -> Self {
        track.info.index = self.tracks.len();
        self.tracks.push(track);
        self
    }

    /// 1080p30 H.264 plus 44.1kHz stereo AAC
    pub fn video_with_audio(duration_us: i64) -> Self {
        Self::new()
            .with_track(MockTrack::h264(duration_us, 30, 1920, 1080))
            .with_track(MockTrack::aac(duration_us, 44_100, 2))
    }

    pub fn video_only(duration_us: i64) -> Self {
        Self::new().with_track(MockTrack::h264(duration_us, 30, 1920, 1080))
    }

    pub fn audio_only(duration_us: i64) -> Self {
        Self::new().with_track(MockTrack::aac(duration_us, 44_100, 2))
    }
}

/// Queue and timing knobs
#[derive(Debug, Clone)]
pub struct MockTuning {
    /// Inputs a decoder holds before reporting busy
    pub decoder_slots: usize,
    /// Inputs an audio encoder holds before reporting busy
    pub encoder_slots: usize,
    /// Largest PCM chunk an audio encoder accepts per submit
    pub audio_input_capacity: usize,
    /// Inputs the video encoder consumes before reporting its format
    pub video_format_after: usize,
    /// Inputs the audio encoder consumes before reporting its format
    pub audio_format_after: usize,
    /// Emit a codec-config sample right after the format
    pub emit_codec_config: bool,
}

impl Default for MockTuning {
    fn default() -> Self {
        Self {
            decoder_slots: 2,
            encoder_slots: 4,
            audio_input_capacity: 2048,
            video_format_after: 1,
            audio_format_after: 1,
            emit_codec_config: true,
        }
    }
}

/// Injected failure
#[derive(Debug, Clone, PartialEq)]
pub enum MockFault {
    FailOpenDemuxer,
    FailCreate(Stage),
    FailStart(Stage),
    FailStop(Stage),
    FailRelease(Stage),
    /// Fail the muxer write after this many successful writes
    FailWriteAfter(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceAction {
    Created,
    Started,
    Stopped,
    Released,
    TrackAdded,
    SampleWritten,
    InputAccepted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEvent {
    pub label: String,
    pub action: ResourceAction,
}

/// Shared, ordered record of native calls
#[derive(Debug, Clone, Default)]
pub struct ResourceLog(Arc<Mutex<Vec<ResourceEvent>>>);

impl ResourceLog {
    fn events_mut(&self) -> MutexGuard<'_, Vec<ResourceEvent>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, label: &str, action: ResourceAction) {
        self.events_mut().push(ResourceEvent {
            label: label.to_string(),
            action,
        });
    }

    pub fn events(&self) -> Vec<ResourceEvent> {
        self.events_mut().clone()
    }

    pub fn count(&self, label: &str, action: ResourceAction) -> usize {
        self.events_mut()
            .iter()
            .filter(|e| e.label == label && e.action == action)
            .count()
    }

    /// Labels of every resource created, in creation order
    pub fn created(&self) -> Vec<String> {
        self.events_mut()
            .iter()
            .filter(|e| e.action == ResourceAction::Created)
            .map(|e| e.label.clone())
            .collect()
    }

    /// Labels in the order they were released
    pub fn release_order(&self) -> Vec<String> {
        self.events_mut()
            .iter()
            .filter(|e| e.action == ResourceAction::Released)
            .map(|e| e.label.clone())
            .collect()
    }

    /// Position of the first matching event
    pub fn position(&self, label: &str, action: ResourceAction) -> Option<usize> {
        self.events_mut()
            .iter()
            .position(|e| e.label == label && e.action == action)
    }

    pub fn clear(&self) {
        self.events_mut().clear();
    }
}

#[derive(Clone, Default)]
struct Faults(Arc<Mutex<Vec<MockFault>>>);

impl Faults {
    fn has(&self, fault: &MockFault) -> bool {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(fault)
    }

    fn write_limit(&self) -> Option<usize> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find_map(|f| match f {
                MockFault::FailWriteAfter(n) => Some(*n),
                _ => None,
            })
    }

    fn check(&self, fault: MockFault, stage: Stage) -> CompressResult<()> {
        if self.has(&fault) {
            return Err(CompressError::configure(stage, format!("injected {fault:?}")));
        }
        Ok(())
    }
}

/// Lifecycle plumbing every mock resource shares
#[derive(Clone)]
struct Handle {
    label: String,
    stage: Stage,
    log: ResourceLog,
    faults: Faults,
}

impl Handle {
    fn stop(&self) -> CompressResult<()> {
        self.faults.check(MockFault::FailStop(self.stage), self.stage)?;
        self.log.record(&self.label, ResourceAction::Stopped);
        Ok(())
    }

    fn release(&self) -> CompressResult<()> {
        self.log.record(&self.label, ResourceAction::Released);
        self.faults.check(MockFault::FailRelease(self.stage), self.stage)
    }

    fn start(&self) -> CompressResult<()> {
        self.faults.check(MockFault::FailStart(self.stage), self.stage)?;
        self.log.record(&self.label, ResourceAction::Started);
        Ok(())
    }
}

type FrameQueue = Rc<RefCell<VecDeque<i64>>>;

/// In-memory codec backend for exercising the pipeline without media files
#[derive(Clone, Default)]
pub struct MockBackend {
    sources: Arc<Mutex<HashMap<PathBuf, MockMedia>>>,
    tuning: MockTuning,
    faults: Faults,
    log: ResourceLog,
    demuxers_opened: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tuning(mut self, tuning: MockTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_fault(self, fault: MockFault) -> Self {
        self.inject(fault);
        self
    }

    pub fn inject(&self, fault: MockFault) {
        self.faults
            .0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(fault);
    }

    pub fn register_source(&self, path: impl Into<PathBuf>, media: MockMedia) {
        self.sources
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(path.into(), media);
    }

    pub fn log(&self) -> &ResourceLog {
        &self.log
    }

    fn handle(&self, label: impl Into<String>, stage: Stage) -> Handle {
        let handle = Handle {
            label: label.into(),
            stage,
            log: self.log.clone(),
            faults: self.faults.clone(),
        };
        self.log.record(&handle.label, ResourceAction::Created);
        handle
    }

    fn create(&self, stage: Stage) -> CompressResult<Handle> {
        self.faults.check(MockFault::FailCreate(stage), stage)?;
        Ok(self.handle(stage.to_string(), stage))
    }
}

impl CodecBackend for MockBackend {
    type Params = ();
    type Demuxer = MockDemuxer;
    type Surface = MockSurface;
    type Decoder = MockDecoder;
    type Encoder = MockEncoder;
    type Muxer = MockMuxer;

    fn open_demuxer(&self, source: &Path) -> CompressResult<MockDemuxer> {
        let media = self
            .sources
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(source)
            .cloned()
            .ok_or_else(|| CompressError::SourceUnreadable {
                path: source.display().to_string(),
                message: "no such mock source".into(),
            })?;
        if self.faults.has(&MockFault::FailOpenDemuxer) {
            return Err(CompressError::SourceUnreadable {
                path: source.display().to_string(),
                message: "injected FailOpenDemuxer".into(),
            });
        }
        let n = self.demuxers_opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockDemuxer {
            handle: self.handle(format!("demuxer {n}"), Stage::VideoDemuxer),
            tracks: media.tracks,
            selected: None,
            cursor: 0,
        })
    }

    fn create_video_encoder(&self, settings: &VideoEncoderSettings) -> CompressResult<MockEncoder> {
        let handle = self.create(Stage::VideoEncoder)?;
        Ok(MockEncoder::new(
            handle,
            FormatSummary {
                kind: MediaKind::Video,
                codec: "h264".into(),
                width: Some(settings.width),
                height: Some(settings.height),
                sample_rate: None,
                channels: None,
                bitrate: settings.bitrate,
            },
            &self.tuning,
            settings.frame_rate,
        ))
    }

    fn create_audio_encoder(&self, settings: &AudioEncoderSettings) -> CompressResult<MockEncoder> {
        let handle = self.create(Stage::AudioEncoder)?;
        Ok(MockEncoder::new(
            handle,
            FormatSummary {
                kind: MediaKind::Audio,
                codec: "aac".into(),
                width: None,
                height: None,
                sample_rate: Some(settings.sample_rate),
                channels: Some(settings.channels),
                bitrate: settings.bitrate,
            },
            &self.tuning,
            0,
        ))
    }

    fn create_decoder(
        &self,
        demuxer: &MockDemuxer,
        track: usize,
        surface: Option<&MockSurface>,
    ) -> CompressResult<MockDecoder> {
        let info = demuxer.track_info(track)?;
        let kind = info.kind().ok_or_else(|| {
            CompressError::configure(Stage::VideoDecoder, format!("unsupported mime {}", info.mime))
        })?;
        let stage = Stage::decoder(kind);
        if kind == MediaKind::Video && surface.is_none() {
            return Err(CompressError::configure(stage, "video decoder needs a surface"));
        }
        let handle = self.create(stage)?;
        let bytes_per_frame = 2 * info.channels.unwrap_or(2) as usize;
        Ok(MockDecoder {
            handle,
            kind,
            slots: self.tuning.decoder_slots,
            queue: VecDeque::new(),
            surface: surface.map(|s| s.frames.clone()),
            format_reported: false,
            outstanding: None,
            pcm_bytes: MOCK_AUDIO_FRAMES_PER_PACKET * bytes_per_frame,
        })
    }

    fn create_muxer(&self, destination: &Path) -> CompressResult<MockMuxer> {
        let handle = self.create(Stage::Muxer)?;
        Ok(MockMuxer {
            handle,
            destination: destination.to_path_buf(),
            container: MockContainer::default(),
            started: false,
            writes: 0,
        })
    }
}

pub struct MockDemuxer {
    handle: Handle,
    tracks: Vec<MockTrack>,
    selected: Option<usize>,
    cursor: usize,
}

impl NativeResource for MockDemuxer {
    fn release(&mut self) -> CompressResult<()> {
        self.handle.release()
    }
}

impl Demuxer for MockDemuxer {
    fn track_count(&self) -> CompressResult<usize> {
        Ok(self.tracks.len())
    }

    fn track_info(&self, index: usize) -> CompressResult<TrackInfo> {
        self.tracks
            .get(index)
            .map(|t| t.info.clone())
            .ok_or_else(|| CompressError::codec(self.handle.stage, format!("no track {index}")))
    }

    fn select_track(&mut self, index: usize) -> CompressResult<()> {
        self.track_info(index)?;
        self.selected = Some(index);
        self.cursor = 0;
        Ok(())
    }

    fn read_sample(&mut self) -> CompressResult<Option<Sample>> {
        let index = self
            .selected
            .ok_or_else(|| CompressError::codec(self.handle.stage, "no track selected"))?;
        let sample = self.tracks[index].samples.get(self.cursor).cloned();
        if sample.is_some() {
            self.cursor += 1;
        }
        Ok(sample)
    }
}

/// Frame queue shared by a video decoder and the encoder that created it
pub struct MockSurface {
    handle: Handle,
    frames: FrameQueue,
}

impl NativeResource for MockSurface {
    fn release(&mut self) -> CompressResult<()> {
        self.handle.release()
    }
}

impl InputSurface for MockSurface {}

pub struct MockDecoder {
    handle: Handle,
    kind: MediaKind,
    slots: usize,
    queue: VecDeque<DecoderInput>,
    surface: Option<FrameQueue>,
    format_reported: bool,
    outstanding: Option<DecodedBuffer>,
    pcm_bytes: usize,
}

impl NativeResource for MockDecoder {
    fn stop(&mut self) -> CompressResult<()> {
        self.handle.stop()
    }

    fn release(&mut self) -> CompressResult<()> {
        self.handle.release()
    }
}

impl Decoder for MockDecoder {
    fn start(&mut self) -> CompressResult<()> {
        self.handle.start()
    }

    fn submit(&mut self, input: DecoderInput) -> CompressResult<Submit<DecoderInput>> {
        if self.queue.len() >= self.slots {
            return Ok(Submit::Busy(input));
        }
        self.queue.push_back(input);
        Ok(Submit::Accepted)
    }

    fn poll_output(&mut self) -> CompressResult<DecoderPoll> {
        if self.outstanding.is_some() {
            return Err(CompressError::codec(self.handle.stage, "output buffer not released"));
        }
        if !self.format_reported {
            self.format_reported = true;
            return Ok(DecoderPoll::FormatChanged);
        }
        let buffer = match self.queue.pop_front() {
            None => return Ok(DecoderPoll::TryAgainLater),
            Some(DecoderInput::EndOfStream) => DecodedBuffer {
                end_of_stream: true,
                ..DecodedBuffer::default()
            },
            Some(DecoderInput::Sample(sample)) => match self.kind {
                MediaKind::Video => DecodedBuffer {
                    pts_us: sample.pts_us,
                    size: 1,
                    end_of_stream: false,
                    pcm: Vec::new(),
                },
                MediaKind::Audio => DecodedBuffer {
                    pts_us: sample.pts_us,
                    size: self.pcm_bytes,
                    end_of_stream: false,
                    pcm: vec![0; self.pcm_bytes],
                },
            },
        };
        self.outstanding = Some(buffer.clone());
        Ok(DecoderPoll::Buffer(buffer))
    }

    fn release_output(&mut self, render: bool) -> CompressResult<()> {
        let buffer = self
            .outstanding
            .take()
            .ok_or_else(|| CompressError::codec(self.handle.stage, "no output buffer to release"))?;
        if render {
            let surface = self
                .surface
                .as_ref()
                .ok_or_else(|| CompressError::codec(self.handle.stage, "render without a surface"))?;
            surface.borrow_mut().push_back(buffer.pts_us);
        }
        Ok(())
    }
}

pub struct MockEncoder {
    handle: Handle,
    summary: FormatSummary,
    frame_rate: u32,
    slots: usize,
    capacity: usize,
    format_after: usize,
    emit_codec_config: bool,
    surface: Option<FrameQueue>,
    inputs: VecDeque<EncoderInput>,
    outputs: VecDeque<Sample>,
    consumed: usize,
    last_pts_us: Option<i64>,
    end_of_input: bool,
    format_sent: bool,
    config_sent: bool,
    eos_sent: bool,
}

impl MockEncoder {
    fn new(handle: Handle, summary: FormatSummary, tuning: &MockTuning, frame_rate: u32) -> Self {
        let format_after = match summary.kind {
            MediaKind::Video => tuning.video_format_after,
            MediaKind::Audio => tuning.audio_format_after,
        };
        Self {
            handle,
            summary,
            frame_rate,
            slots: tuning.encoder_slots,
            capacity: tuning.audio_input_capacity,
            format_after,
            emit_codec_config: tuning.emit_codec_config,
            surface: None,
            inputs: VecDeque::new(),
            outputs: VecDeque::new(),
            consumed: 0,
            last_pts_us: None,
            end_of_input: false,
            format_sent: false,
            config_sent: false,
            eos_sent: false,
        }
    }

    /// Encoded payload size that keeps the stream at the target bitrate
    fn payload_for(&self, duration_us: i64) -> usize {
        (self.summary.bitrate as i64 * duration_us / 8 / 1_000_000).max(1) as usize
    }

    fn encode_frame(&mut self, pts_us: i64) {
        let frame_us = 1_000_000 / self.frame_rate.max(1) as i64;
        let duration = self.last_pts_us.map_or(frame_us, |last| (pts_us - last).max(1));
        let key = self.consumed % (self.frame_rate.max(1) as usize) == 0;
        let sample = Sample::new(vec![0x41; self.payload_for(duration)], pts_us);
        self.outputs.push_back(if key {
            sample.with_flags(SampleFlags::KEY_FRAME)
        } else {
            sample
        });
        self.last_pts_us = Some(pts_us);
        self.consumed += 1;
    }

    fn encode_pcm(&mut self, data: &[u8], pts_us: i64) {
        let rate = self.summary.sample_rate.unwrap_or(44_100) as i64;
        let channels = self.summary.channels.unwrap_or(2) as i64;
        let frames = data.len() as i64 / (2 * channels);
        let payload = self.payload_for(frames * 1_000_000 / rate);
        self.outputs.push_back(Sample::new(vec![0x11; payload], pts_us));
        self.consumed += 1;
    }

    /// Pull one unit of pending input into the output queue
    fn consume_one(&mut self) {
        if let Some(frames) = self.surface.clone() {
            let next = frames.borrow_mut().pop_front();
            if let Some(pts_us) = next {
                self.encode_frame(pts_us);
            }
            return;
        }
        match self.inputs.pop_front() {
            Some(EncoderInput::Pcm { data, pts_us }) => self.encode_pcm(&data, pts_us),
            Some(EncoderInput::EndOfStream { .. }) => self.end_of_input = true,
            None => {}
        }
    }

    fn input_exhausted(&self) -> bool {
        match &self.surface {
            Some(frames) => self.end_of_input && frames.borrow().is_empty(),
            None => self.end_of_input && self.inputs.is_empty(),
        }
    }
}

impl NativeResource for MockEncoder {
    fn stop(&mut self) -> CompressResult<()> {
        self.handle.stop()
    }

    fn release(&mut self) -> CompressResult<()> {
        self.handle.release()
    }
}

impl Encoder for MockEncoder {
    type Params = ();
    type Surface = MockSurface;

    fn create_input_surface(&mut self) -> CompressResult<MockSurface> {
        if self.summary.kind != MediaKind::Video {
            return Err(CompressError::configure(self.handle.stage, "audio encoders have no surface"));
        }
        let frames: FrameQueue = Rc::new(RefCell::new(VecDeque::new()));
        self.surface = Some(frames.clone());
        let handle = Handle {
            label: Stage::InputSurface.to_string(),
            stage: Stage::InputSurface,
            log: self.handle.log.clone(),
            faults: self.handle.faults.clone(),
        };
        handle.faults.check(MockFault::FailCreate(Stage::InputSurface), Stage::InputSurface)?;
        handle.log.record(&handle.label, ResourceAction::Created);
        Ok(MockSurface { handle, frames })
    }

    fn start(&mut self) -> CompressResult<()> {
        self.handle.start()
    }

    fn input_capacity(&self) -> usize {
        self.capacity
    }

    fn submit(&mut self, input: EncoderInput, _wait: Duration) -> CompressResult<Submit<EncoderInput>> {
        if self.surface.is_some() {
            return Err(CompressError::codec(self.handle.stage, "surface encoders take no buffers"));
        }
        if let EncoderInput::Pcm { data, .. } = &input {
            if data.len() > self.capacity {
                return Err(CompressError::codec(
                    self.handle.stage,
                    format!("chunk of {} bytes exceeds capacity {}", data.len(), self.capacity),
                ));
            }
        }
        if self.inputs.len() >= self.slots {
            return Ok(Submit::Busy(input));
        }
        self.inputs.push_back(input);
        self.handle.log.record(&self.handle.label, ResourceAction::InputAccepted);
        Ok(Submit::Accepted)
    }

    fn signal_end_of_input_stream(&mut self) -> CompressResult<()> {
        if self.surface.is_none() {
            return Err(CompressError::codec(self.handle.stage, "end of input signal needs a surface"));
        }
        self.end_of_input = true;
        Ok(())
    }

    fn poll_output(&mut self) -> CompressResult<EncoderPoll<()>> {
        self.consume_one();

        if !self.format_sent {
            if self.consumed >= self.format_after || self.input_exhausted() {
                self.format_sent = true;
                return Ok(EncoderPoll::FormatChanged(NegotiatedFormat {
                    summary: self.summary.clone(),
                    params: (),
                }));
            }
            return Ok(EncoderPoll::TryAgainLater);
        }
        if self.emit_codec_config && !self.config_sent {
            self.config_sent = true;
            return Ok(EncoderPoll::Sample(
                Sample::new(vec![0, 0, 0, 1, 0x67], 0).with_flags(SampleFlags::CODEC_CONFIG),
            ));
        }
        if let Some(sample) = self.outputs.pop_front() {
            return Ok(EncoderPoll::Sample(sample));
        }
        if self.input_exhausted() && !self.eos_sent {
            self.eos_sent = true;
            return Ok(EncoderPoll::Sample(Sample::end_of_stream(
                self.last_pts_us.unwrap_or(0),
            )));
        }
        Ok(EncoderPoll::TryAgainLater)
    }
}

/// A sample as recorded by the mock container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockWrittenSample {
    pub pts_us: i64,
    pub size: usize,
    pub key_frame: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockContainerTrack {
    pub format: FormatSummary,
    pub samples: Vec<MockWrittenSample>,
}

impl MockContainerTrack {
    /// Average bitrate over the track's timestamp span
    pub fn bitrate_bps(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        let bytes: usize = self.samples.iter().map(|s| s.size).sum();
        let span = (self.samples[n - 1].pts_us - self.samples[0].pts_us) as f64;
        let duration_secs = span * n as f64 / (n - 1) as f64 / 1_000_000.0;
        bytes as f64 * 8.0 / duration_secs
    }
}

/// JSON document the mock muxer writes on stop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MockContainer {
    pub tracks: Vec<MockContainerTrack>,
}

impl MockContainer {
    pub fn read(path: &Path) -> CompressResult<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| CompressError::Muxer {
            message: format!("unreadable mock container: {e}"),
        })
    }

    pub fn track(&self, kind: MediaKind) -> Option<&MockContainerTrack> {
        self.tracks.iter().find(|t| t.format.kind == kind)
    }
}

pub struct MockMuxer {
    handle: Handle,
    destination: PathBuf,
    container: MockContainer,
    started: bool,
    writes: usize,
}

impl NativeResource for MockMuxer {
    fn stop(&mut self) -> CompressResult<()> {
        self.handle.stop()?;
        let json = serde_json::to_string_pretty(&self.container).map_err(|e| CompressError::Muxer {
            message: e.to_string(),
        })?;
        std::fs::write(&self.destination, json)?;
        Ok(())
    }

    fn release(&mut self) -> CompressResult<()> {
        self.handle.release()
    }
}

impl Muxer for MockMuxer {
    type Params = ();

    fn add_track(&mut self, format: &NegotiatedFormat<()>) -> CompressResult<usize> {
        if self.started {
            return Err(CompressError::Muxer {
                message: "track added after start".into(),
            });
        }
        self.container.tracks.push(MockContainerTrack {
            format: format.summary.clone(),
            samples: Vec::new(),
        });
        self.handle.log.record(&self.handle.label, ResourceAction::TrackAdded);
        Ok(self.container.tracks.len() - 1)
    }

    fn start(&mut self) -> CompressResult<()> {
        self.handle.start()?;
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &Sample) -> CompressResult<()> {
        if !self.started {
            return Err(CompressError::WriteBeforeStart { track });
        }
        if self.handle.faults.write_limit().is_some_and(|limit| self.writes >= limit) {
            return Err(CompressError::Muxer {
                message: "injected write failure".into(),
            });
        }
        let entry = self.container.tracks.get_mut(track).ok_or_else(|| CompressError::Muxer {
            message: format!("no track {track}"),
        })?;
        entry.samples.push(MockWrittenSample {
            pts_us: sample.pts_us,
            size: sample.data.len(),
            key_frame: sample.flags.key_frame,
        });
        self.writes += 1;
        self.handle.log.record(&self.handle.label, ResourceAction::SampleWritten);
        Ok(())
    }
}
