// Decoders, encoders and the frame surface between them

use ffmpeg_next as ffmpeg;
use ffmpeg::codec::{self, decoder, encoder, threading};
use ffmpeg::format::{sample, Pixel, Sample as SampleFormat};
use ffmpeg::software::{resampling, scaling};
use ffmpeg::util::frame;
use ffmpeg::{ChannelLayout, Dictionary, Packet, Rational, Rescale};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace};

use super::{configure_err, ffmpeg_err, is_again, LibavDemuxer, MICROS};
use crate::domain::model::{
    AudioEncoderSettings, FormatSummary, MediaKind, NegotiatedFormat, Sample, SampleFlags,
    VideoEncoderSettings,
};
use crate::error::{CompressError, CompressResult, Stage};
use crate::ports::{
    DecodedBuffer, Decoder, DecoderInput, DecoderPoll, Demuxer, Encoder, EncoderInput, EncoderPoll,
    InputSurface, NativeResource, Submit,
};

/// Whole AAC frames the PCM queue may hold before submits report busy
const PCM_BACKLOG_FRAMES: usize = 4;

fn to_packet(sample: &Sample) -> Packet {
    let mut packet = Packet::copy(&sample.data);
    packet.set_pts(Some(sample.pts_us));
    packet.set_dts(sample.dts_us);
    if sample.flags.key_frame {
        packet.set_flags(codec::packet::Flags::KEY);
    }
    packet
}

fn released(resource: &str) -> CompressError {
    CompressError::ResourceReleased {
        resource: resource.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Surface
// ---------------------------------------------------------------------------

struct SurfaceState {
    width: u32,
    height: u32,
    scaler: Option<(scaling::Context, (Pixel, u32, u32))>,
    frames: VecDeque<frame::Video>,
    released: bool,
}

/// Frame queue shared by a video decoder and the encoder that created it.
/// Rendered frames are scaled to the encoder's size in YUV 4:2:0.
#[derive(Clone)]
pub struct LibavSurface {
    state: Rc<RefCell<SurfaceState>>,
}

impl LibavSurface {
    fn new(width: u32, height: u32) -> Self {
        Self {
            state: Rc::new(RefCell::new(SurfaceState {
                width,
                height,
                scaler: None,
                frames: VecDeque::new(),
                released: false,
            })),
        }
    }

    fn render(&self, source: &frame::Video) -> CompressResult<()> {
        let mut state = self.state.borrow_mut();
        if state.released {
            return Err(released("input surface"));
        }

        let input = (source.format(), source.width(), source.height());
        if state.scaler.as_ref().map_or(true, |(_, current)| *current != input) {
            let scaler = scaling::Context::get(
                input.0,
                input.1,
                input.2,
                Pixel::YUV420P,
                state.width,
                state.height,
                scaling::Flags::BILINEAR,
            )
            .map_err(configure_err(Stage::InputSurface))?;
            debug!(from_w = input.1, from_h = input.2, to_w = state.width, to_h = state.height, "surface scaler ready");
            state.scaler = Some((scaler, input));
        }

        let mut scaled = frame::Video::empty();
        if let Some((scaler, _)) = state.scaler.as_mut() {
            scaler
                .run(source, &mut scaled)
                .map_err(ffmpeg_err(Stage::InputSurface))?;
        }
        scaled.set_pts(source.timestamp().or(source.pts()));
        state.frames.push_back(scaled);
        Ok(())
    }

    fn take(&self) -> Option<frame::Video> {
        self.state.borrow_mut().frames.pop_front()
    }

    fn requeue(&self, frame: frame::Video) {
        self.state.borrow_mut().frames.push_front(frame);
    }

    fn is_empty(&self) -> bool {
        self.state.borrow().frames.is_empty()
    }
}

impl NativeResource for LibavSurface {
    fn release(&mut self) -> CompressResult<()> {
        let mut state = self.state.borrow_mut();
        state.released = true;
        state.frames.clear();
        state.scaler = None;
        Ok(())
    }
}

impl InputSurface for LibavSurface {}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

enum DecoderInner {
    Video {
        decoder: decoder::Video,
        surface: LibavSurface,
        held: Option<frame::Video>,
    },
    Audio {
        decoder: decoder::Audio,
        resampler: Option<resampling::Context>,
        channels: u16,
    },
}

pub struct LibavDecoder {
    stage: Stage,
    inner: Option<DecoderInner>,
    drained: bool,
}

impl LibavDecoder {
    pub(super) fn open(
        demuxer: &LibavDemuxer,
        track: usize,
        surface: Option<&LibavSurface>,
        threads: usize,
    ) -> CompressResult<Self> {
        let info = demuxer.track_info(track)?;
        let kind = info.kind().ok_or_else(|| {
            CompressError::configure(Stage::VideoDecoder, format!("track {track} ({}) is not audio or video", info.mime))
        })?;
        let stage = Stage::decoder(kind);

        let stream = demuxer
            .input()?
            .stream(track)
            .ok_or_else(|| CompressError::configure(stage, format!("no stream {track}")))?;
        let mut context = codec::context::Context::from_parameters(stream.parameters())
            .map_err(configure_err(stage))?;
        context.set_threading(threading::Config {
            kind: threading::Type::Frame,
            count: threads,
        });

        let inner = match kind {
            MediaKind::Video => {
                let surface = surface
                    .ok_or_else(|| CompressError::configure(stage, "video decoder needs an input surface"))?
                    .clone();
                let decoder = context.decoder().video().map_err(configure_err(stage))?;
                DecoderInner::Video {
                    decoder,
                    surface,
                    held: None,
                }
            }
            MediaKind::Audio => {
                let decoder = context.decoder().audio().map_err(configure_err(stage))?;
                DecoderInner::Audio {
                    decoder,
                    resampler: None,
                    channels: AudioEncoderSettings::for_source(&info, 0).channels,
                }
            }
        };

        debug!(%stage, track, mime = %info.mime, "decoder opened");
        Ok(Self {
            stage,
            inner: Some(inner),
            drained: false,
        })
    }

    fn opened(&mut self) -> CompressResult<&mut decoder::Opened> {
        match self.inner.as_mut() {
            Some(DecoderInner::Video { decoder, .. }) => Ok(&mut **decoder),
            Some(DecoderInner::Audio { decoder, .. }) => Ok(&mut **decoder),
            None => Err(released(&self.stage.to_string())),
        }
    }
}

/// Target layout for the configured channel count; anything above two is downmixed to stereo
pub(super) fn layout_for(channels: u16) -> ChannelLayout {
    if channels <= 1 {
        ChannelLayout::MONO
    } else {
        ChannelLayout::STEREO
    }
}

/// Convert one decoded audio frame to interleaved signed 16-bit PCM
fn interleave_s16(
    resampler: &mut Option<resampling::Context>,
    source_layout: ChannelLayout,
    decoded: &frame::Audio,
    channels: u16,
) -> CompressResult<Vec<u8>> {
    let stage = Stage::AudioDecoder;
    let target = layout_for(channels);
    let out_channels = channels.clamp(1, 2) as usize;

    if resampler.is_none() {
        let context = resampling::Context::get(
            decoded.format(),
            source_layout,
            decoded.rate(),
            SampleFormat::I16(sample::Type::Packed),
            target,
            decoded.rate(),
        )
        .map_err(configure_err(stage))?;
        *resampler = Some(context);
    }

    let mut converted = frame::Audio::empty();
    if let Some(context) = resampler.as_mut() {
        context
            .run(decoded, &mut converted)
            .map_err(ffmpeg_err(stage))?;
    }

    let bytes = converted.samples() * 2 * out_channels;
    let plane = converted.data(0);
    Ok(plane[..bytes.min(plane.len())].to_vec())
}

impl NativeResource for LibavDecoder {
    fn release(&mut self) -> CompressResult<()> {
        self.inner = None;
        Ok(())
    }
}

impl Decoder for LibavDecoder {
    fn start(&mut self) -> CompressResult<()> {
        // libav decoders are live as soon as they are opened
        self.opened().map(|_| ())
    }

    fn submit(&mut self, input: DecoderInput) -> CompressResult<Submit<DecoderInput>> {
        let stage = self.stage;
        let opened = self.opened()?;
        let result = match &input {
            DecoderInput::Sample(sample) => opened.send_packet(&to_packet(sample)),
            DecoderInput::EndOfStream => opened.send_eof(),
        };
        match result {
            Ok(()) => Ok(Submit::Accepted),
            Err(e) if is_again(&e) => Ok(Submit::Busy(input)),
            Err(e) => Err(CompressError::codec(stage, e)),
        }
    }

    fn poll_output(&mut self) -> CompressResult<DecoderPoll> {
        let stage = self.stage;
        if self.drained {
            return Ok(DecoderPoll::TryAgainLater);
        }
        let Some(inner) = self.inner.as_mut() else {
            return Err(released(&stage.to_string()));
        };

        let received = match inner {
            DecoderInner::Video { decoder, held, .. } => {
                if held.is_some() {
                    return Err(CompressError::codec(stage, "previous frame was not released"));
                }
                let mut decoded = frame::Video::empty();
                decoder.receive_frame(&mut decoded).map(|()| {
                    let buffer = DecodedBuffer {
                        pts_us: decoded.timestamp().or(decoded.pts()).unwrap_or(0),
                        size: decoded.width() as usize * decoded.height() as usize,
                        ..DecodedBuffer::default()
                    };
                    *held = Some(decoded);
                    buffer
                })
            }
            DecoderInner::Audio {
                decoder,
                resampler,
                channels,
            } => {
                let mut decoded = frame::Audio::empty();
                match decoder.receive_frame(&mut decoded) {
                    Ok(()) => {
                        let source_layout = decoder.channel_layout();
                        let pcm = interleave_s16(resampler, source_layout, &decoded, *channels)?;
                        Ok(DecodedBuffer {
                            pts_us: decoded.timestamp().or(decoded.pts()).unwrap_or(0),
                            size: pcm.len(),
                            end_of_stream: false,
                            pcm,
                        })
                    }
                    Err(e) => Err(e),
                }
            }
        };

        match received {
            Ok(buffer) => Ok(DecoderPoll::Buffer(buffer)),
            Err(e) if is_again(&e) => Ok(DecoderPoll::TryAgainLater),
            Err(ffmpeg::Error::Eof) => {
                self.drained = true;
                Ok(DecoderPoll::Buffer(DecodedBuffer {
                    end_of_stream: true,
                    ..DecodedBuffer::default()
                }))
            }
            Err(e) => Err(CompressError::codec(stage, e)),
        }
    }

    fn release_output(&mut self, render: bool) -> CompressResult<()> {
        if let Some(DecoderInner::Video { surface, held, .. }) = self.inner.as_mut() {
            if let Some(frame) = held.take() {
                if render {
                    surface.render(&frame)?;
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Per-channel float queue that cuts PCM into fixed-size AAC frames
struct PcmQueue {
    planes: Vec<VecDeque<f32>>,
}

impl PcmQueue {
    fn new(channels: u16) -> Self {
        Self {
            planes: (0..channels.max(1)).map(|_| VecDeque::new()).collect(),
        }
    }

    /// Samples per channel currently queued
    fn len(&self) -> usize {
        self.planes[0].len()
    }

    fn push_s16(&mut self, data: &[u8]) {
        let channels = self.planes.len();
        for (i, bytes) in data.chunks_exact(2).enumerate() {
            let value = i16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / 32768.0;
            self.planes[i % channels].push_back(value);
        }
    }

    /// Pop up to `frame_size` samples into a planar float frame, zero-padding the tail
    fn pop_frame(&mut self, frame_size: usize, layout: ChannelLayout, rate: u32, pts: i64) -> frame::Audio {
        let available = self.len().min(frame_size);
        let mut out = frame::Audio::new(SampleFormat::F32(sample::Type::Planar), frame_size, layout);
        out.set_rate(rate);
        out.set_pts(Some(pts));

        for (index, plane) in self.planes.iter_mut().enumerate() {
            let data = out.data_mut(index);
            // SAFETY: the frame was allocated for `frame_size` f32 samples per plane.
            let dst = unsafe { std::slice::from_raw_parts_mut(data.as_mut_ptr() as *mut f32, frame_size) };
            for (slot, value) in dst.iter_mut().zip(plane.drain(..available)) {
                *slot = value;
            }
            dst[available..].fill(0.0);
        }
        out
    }
}

enum EncoderInner {
    Video {
        encoder: encoder::Video,
        size: (u32, u32),
        surface: Option<LibavSurface>,
        input_ended: bool,
    },
    Audio {
        encoder: encoder::Audio,
        queue: PcmQueue,
        layout: ChannelLayout,
        rate: u32,
        frame_size: usize,
        bytes_per_frame: usize,
        next_pts: Option<i64>,
        input_ended: bool,
    },
}

pub struct LibavEncoder {
    stage: Stage,
    inner: Option<EncoderInner>,
    summary: FormatSummary,
    time_base: Rational,
    format_reported: bool,
    stashed: Option<Sample>,
    eof_sent: bool,
    finished: bool,
    last_pts_us: i64,
}

impl LibavEncoder {
    pub(super) fn video(settings: &VideoEncoderSettings) -> CompressResult<Self> {
        let stage = Stage::VideoEncoder;
        let h264 = encoder::find(codec::Id::H264)
            .ok_or_else(|| CompressError::configure(stage, "no H.264 encoder available"))?;

        let mut context = codec::context::Context::new_with_codec(h264);
        context.set_flags(codec::flag::Flags::GLOBAL_HEADER);
        let mut video = context.encoder().video().map_err(configure_err(stage))?;
        video.set_width(settings.width);
        video.set_height(settings.height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(MICROS);
        video.set_frame_rate(Some(Rational(settings.frame_rate as i32, 1)));
        video.set_bit_rate(settings.bitrate as usize);
        video.set_gop(settings.gop_size());
        video.set_max_b_frames(0);

        let mut options = Dictionary::new();
        options.set("preset", &settings.preset);
        options.set("threads", &settings.threads.to_string());
        let encoder = video.open_with(options).map_err(configure_err(stage))?;

        debug!(
            width = settings.width,
            height = settings.height,
            bitrate = settings.bitrate,
            gop = settings.gop_size(),
            "H.264 encoder configured"
        );
        Ok(Self::build(
            stage,
            EncoderInner::Video {
                encoder,
                size: (settings.width, settings.height),
                surface: None,
                input_ended: false,
            },
            FormatSummary {
                kind: MediaKind::Video,
                codec: "video/avc".to_string(),
                width: Some(settings.width),
                height: Some(settings.height),
                sample_rate: None,
                channels: None,
                bitrate: settings.bitrate,
            },
            MICROS,
        ))
    }

    pub(super) fn audio(settings: &AudioEncoderSettings) -> CompressResult<Self> {
        let stage = Stage::AudioEncoder;
        let aac = encoder::find(codec::Id::AAC)
            .ok_or_else(|| CompressError::configure(stage, "no AAC encoder available"))?;

        let layout = layout_for(settings.channels);
        let time_base = Rational(1, settings.sample_rate as i32);
        let mut context = codec::context::Context::new_with_codec(aac);
        context.set_flags(codec::flag::Flags::GLOBAL_HEADER);
        let mut audio = context.encoder().audio().map_err(configure_err(stage))?;
        audio.set_rate(settings.sample_rate as i32);
        audio.set_channel_layout(layout);
        audio.set_format(SampleFormat::F32(sample::Type::Planar));
        audio.set_bit_rate(settings.bitrate as usize);
        audio.set_time_base(time_base);
        let encoder = audio.open_as(aac).map_err(configure_err(stage))?;
        let frame_size = (encoder.frame_size() as usize).max(1024);

        debug!(
            sample_rate = settings.sample_rate,
            channels = settings.channels,
            bitrate = settings.bitrate,
            frame_size,
            "AAC encoder configured"
        );
        Ok(Self::build(
            stage,
            EncoderInner::Audio {
                encoder,
                queue: PcmQueue::new(settings.channels),
                layout,
                rate: settings.sample_rate,
                frame_size,
                bytes_per_frame: settings.bytes_per_frame(),
                next_pts: None,
                input_ended: false,
            },
            FormatSummary {
                kind: MediaKind::Audio,
                codec: "audio/mp4a-latm".to_string(),
                width: None,
                height: None,
                sample_rate: Some(settings.sample_rate),
                channels: Some(settings.channels),
                bitrate: settings.bitrate,
            },
            time_base,
        ))
    }

    fn build(stage: Stage, inner: EncoderInner, summary: FormatSummary, time_base: Rational) -> Self {
        Self {
            stage,
            inner: Some(inner),
            summary,
            time_base,
            format_reported: false,
            stashed: None,
            eof_sent: false,
            finished: false,
            last_pts_us: 0,
        }
    }

    fn inner_mut(&mut self) -> CompressResult<&mut EncoderInner> {
        let stage = self.stage;
        self.inner
            .as_mut()
            .ok_or_else(|| released(&stage.to_string()))
    }

    /// Push whatever input is ready into the codec, then end of stream once
    /// all input is in
    fn pump_input(&mut self) -> CompressResult<()> {
        let stage = self.stage;
        if self.eof_sent {
            return Ok(());
        }
        let eof_due = match self.inner_mut()? {
            EncoderInner::Video {
                encoder,
                surface,
                input_ended,
                ..
            } => {
                if let Some(surface) = surface.as_ref() {
                    while let Some(frame) = surface.take() {
                        match encoder.send_frame(&frame) {
                            Ok(()) => {}
                            Err(e) if is_again(&e) => {
                                surface.requeue(frame);
                                break;
                            }
                            Err(e) => return Err(CompressError::codec(stage, e)),
                        }
                    }
                }
                *input_ended && surface.as_ref().map_or(true, LibavSurface::is_empty)
            }
            EncoderInner::Audio {
                encoder,
                queue,
                layout,
                rate,
                frame_size,
                next_pts,
                input_ended,
                ..
            } => {
                while queue.len() >= *frame_size || (*input_ended && queue.len() > 0) {
                    let pts = next_pts.unwrap_or(0);
                    let frame = queue.pop_frame(*frame_size, *layout, *rate, pts);
                    match encoder.send_frame(&frame) {
                        Ok(()) => *next_pts = Some(pts + *frame_size as i64),
                        Err(e) if is_again(&e) => break,
                        Err(e) => return Err(CompressError::codec(stage, e)),
                    }
                }
                *input_ended && queue.len() == 0
            }
        };

        if eof_due {
            let sent = match self.inner_mut()? {
                EncoderInner::Video { encoder, .. } => encoder.send_eof(),
                EncoderInner::Audio { encoder, .. } => encoder.send_eof(),
            };
            match sent {
                Ok(()) => {
                    self.eof_sent = true;
                    debug!(%stage, "encoder flushing");
                }
                Err(e) if is_again(&e) => {}
                Err(e) => return Err(CompressError::codec(stage, e)),
            }
        }
        Ok(())
    }

    fn negotiated(&mut self) -> CompressResult<NegotiatedFormat<codec::Parameters>> {
        let params = match self.inner_mut()? {
            EncoderInner::Video { encoder, .. } => codec::Parameters::from(&*encoder),
            EncoderInner::Audio { encoder, .. } => codec::Parameters::from(&*encoder),
        };
        Ok(NegotiatedFormat {
            summary: self.summary.clone(),
            params,
        })
    }
}

impl NativeResource for LibavEncoder {
    fn stop(&mut self) -> CompressResult<()> {
        self.stashed = None;
        Ok(())
    }

    fn release(&mut self) -> CompressResult<()> {
        self.inner = None;
        Ok(())
    }
}

impl Encoder for LibavEncoder {
    type Params = codec::Parameters;
    type Surface = LibavSurface;

    fn create_input_surface(&mut self) -> CompressResult<LibavSurface> {
        let stage = self.stage;
        match self.inner_mut()? {
            EncoderInner::Video { size, surface, .. } => {
                let created = LibavSurface::new(size.0, size.1);
                *surface = Some(created.clone());
                Ok(created)
            }
            EncoderInner::Audio { .. } => Err(CompressError::configure(stage, "audio encoders take PCM input")),
        }
    }

    fn start(&mut self) -> CompressResult<()> {
        let stage = self.stage;
        match self.inner_mut()? {
            EncoderInner::Video { surface: None, .. } => Err(CompressError::configure(
                stage,
                "input surface must be created before start",
            )),
            _ => Ok(()),
        }
    }

    fn input_capacity(&self) -> usize {
        match self.inner.as_ref() {
            Some(EncoderInner::Audio {
                frame_size,
                bytes_per_frame,
                ..
            }) => frame_size * bytes_per_frame,
            _ => 0,
        }
    }

    // Software codecs never block on input, so `wait` is not used.
    fn submit(&mut self, input: EncoderInput, _wait: Duration) -> CompressResult<Submit<EncoderInput>> {
        let stage = self.stage;
        self.pump_input()?;
        let EncoderInner::Audio {
            queue,
            rate,
            frame_size,
            next_pts,
            input_ended,
            ..
        } = self.inner_mut()?
        else {
            return Err(CompressError::codec(stage, "surface-fed encoder takes no raw input"));
        };

        match input {
            EncoderInput::Pcm { data, pts_us } => {
                if queue.len() >= *frame_size * PCM_BACKLOG_FRAMES {
                    return Ok(Submit::Busy(EncoderInput::Pcm { data, pts_us }));
                }
                if next_pts.is_none() {
                    *next_pts = Some(pts_us.rescale(MICROS, Rational(1, *rate as i32)));
                }
                queue.push_s16(&data);
                trace!(bytes = data.len(), queued = queue.len(), "pcm accepted");
            }
            EncoderInput::EndOfStream { .. } => {
                *input_ended = true;
            }
        }
        Ok(Submit::Accepted)
    }

    fn signal_end_of_input_stream(&mut self) -> CompressResult<()> {
        let stage = self.stage;
        match self.inner_mut()? {
            EncoderInner::Video { input_ended, .. } => {
                *input_ended = true;
                Ok(())
            }
            EncoderInner::Audio { .. } => Err(CompressError::codec(
                stage,
                "PCM-fed encoders end with an end-of-stream input",
            )),
        }
    }

    fn poll_output(&mut self) -> CompressResult<EncoderPoll<codec::Parameters>> {
        if let Some(sample) = self.stashed.take() {
            return Ok(EncoderPoll::Sample(sample));
        }
        if self.finished {
            return Ok(EncoderPoll::TryAgainLater);
        }
        self.pump_input()?;

        let stage = self.stage;
        let mut packet = Packet::empty();
        let received = match self.inner_mut()? {
            EncoderInner::Video { encoder, .. } => encoder.receive_packet(&mut packet),
            EncoderInner::Audio { encoder, .. } => encoder.receive_packet(&mut packet),
        };

        match received {
            Ok(()) => {
                let pts_us = packet
                    .pts()
                    .map(|pts| pts.rescale(self.time_base, MICROS))
                    .unwrap_or(self.last_pts_us);
                self.last_pts_us = pts_us;
                let sample = Sample {
                    data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                    pts_us,
                    dts_us: packet.dts().map(|dts| dts.rescale(self.time_base, MICROS)),
                    flags: if packet.is_key() {
                        SampleFlags::KEY_FRAME
                    } else {
                        SampleFlags::default()
                    },
                };
                if !self.format_reported {
                    // Global headers are final once the first packet exists
                    self.format_reported = true;
                    self.stashed = Some(sample);
                    return Ok(EncoderPoll::FormatChanged(self.negotiated()?));
                }
                Ok(EncoderPoll::Sample(sample))
            }
            Err(e) if is_again(&e) => Ok(EncoderPoll::TryAgainLater),
            Err(ffmpeg::Error::Eof) => {
                self.finished = true;
                if !self.format_reported {
                    self.format_reported = true;
                    self.stashed = Some(Sample::end_of_stream(self.last_pts_us));
                    return Ok(EncoderPoll::FormatChanged(self.negotiated()?));
                }
                Ok(EncoderPoll::Sample(Sample::end_of_stream(self.last_pts_us)))
            }
            Err(e) => Err(CompressError::codec(stage, e)),
        }
    }
}
