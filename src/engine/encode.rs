//! Encode stage: raw media in, compressed samples out

use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace};

use crate::domain::model::{MediaKind, Sample};
use crate::domain::rules;
use crate::engine::lifecycle::Guarded;
use crate::engine::mux::MuxCoordinator;
use crate::error::{CompressError, CompressResult, Stage};
use crate::ports::{Encoder, EncoderInput, EncoderPoll, Muxer, Submit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeState {
    NotStarted,
    /// Running, output format not yet known
    AcceptingInput,
    /// Format registered with the muxer, container not started yet
    AwaitingFormat,
    /// Samples flowing into the container
    Emitting,
    /// End of stream seen on the output side
    Done,
}

/// Interleaved 16-bit PCM layout of an audio encoder's input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmLayout {
    pub bytes_per_frame: usize,
    pub sample_rate: u32,
}

pub struct EncodeStage<E: Encoder> {
    kind: MediaKind,
    encoder: Guarded<E>,
    state: EncodeState,
    pcm: Option<PcmLayout>,
    input_wait: Duration,
    pending: VecDeque<EncoderInput>,
    last_input_pts_us: i64,
    input_closed: bool,
    track: Option<usize>,
    held: VecDeque<Sample>,
    track_ended: bool,
}

impl<E: Encoder> EncodeStage<E> {
    /// Surface-fed video stage
    pub fn video(encoder: Guarded<E>) -> Self {
        Self::build(MediaKind::Video, encoder, None, Duration::ZERO)
    }

    /// PCM-fed audio stage; input submits wait at most `input_wait`
    pub fn audio(encoder: Guarded<E>, layout: PcmLayout, input_wait: Duration) -> Self {
        Self::build(MediaKind::Audio, encoder, Some(layout), input_wait)
    }

    fn build(kind: MediaKind, encoder: Guarded<E>, pcm: Option<PcmLayout>, input_wait: Duration) -> Self {
        Self {
            kind,
            encoder,
            state: EncodeState::NotStarted,
            pcm,
            input_wait,
            pending: VecDeque::new(),
            last_input_pts_us: 0,
            input_closed: false,
            track: None,
            held: VecDeque::new(),
            track_ended: false,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn state(&self) -> EncodeState {
        self.state
    }

    pub fn reached_eos(&self) -> bool {
        self.state == EncodeState::Done
    }

    pub fn encoder_mut(&mut self) -> CompressResult<&mut E> {
        self.encoder.get_mut()
    }

    /// Queued input the encoder has not accepted yet
    pub fn is_backlogged(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn held_samples(&self) -> usize {
        self.held.len()
    }

    /// Stop and release the encoder
    pub fn close(&mut self) -> CompressResult<()> {
        self.encoder.close()
    }

    pub fn start(&mut self) -> CompressResult<()> {
        if self.state != EncodeState::NotStarted {
            return Ok(());
        }
        self.encoder.start_with(|encoder| encoder.start())?;
        self.state = EncodeState::AcceptingInput;
        debug!(kind = %self.kind, "encode stage started");
        Ok(())
    }

    /// Queue a decoded PCM chunk, split to the encoder's input capacity.
    ///
    /// Each piece is stamped with the chunk timestamp plus the playback time of
    /// the bytes before it, never earlier than the previous piece.
    pub fn push_pcm(&mut self, data: &[u8], pts_us: i64) -> CompressResult<()> {
        let layout = self.pcm.ok_or_else(|| {
            CompressError::codec(Stage::encoder(self.kind), "raw input pushed to a surface-fed encoder")
        })?;
        if self.input_closed {
            return Err(CompressError::codec(
                Stage::encoder(self.kind),
                "input pushed after end of stream",
            ));
        }

        let capacity = self
            .encoder
            .get()?
            .input_capacity()
            .max(layout.bytes_per_frame);
        let mut consumed = 0;
        while consumed < data.len() {
            let len = rules::pcm_chunk_len(data.len() - consumed, capacity, layout.bytes_per_frame);
            let offset = rules::pcm_offset_us(consumed, layout.bytes_per_frame, layout.sample_rate);
            let chunk_pts = (pts_us + offset).max(self.last_input_pts_us);
            self.pending.push_back(EncoderInput::Pcm {
                data: data[consumed..consumed + len].to_vec(),
                pts_us: chunk_pts,
            });
            self.last_input_pts_us = chunk_pts;
            consumed += len;
        }
        Ok(())
    }

    /// Queue the end-of-stream marker behind any pending PCM
    pub fn push_end_of_stream(&mut self, pts_us: i64) -> CompressResult<()> {
        if self.input_closed {
            return Ok(());
        }
        let pts_us = pts_us.max(self.last_input_pts_us);
        self.pending.push_back(EncoderInput::EndOfStream { pts_us });
        self.input_closed = true;
        Ok(())
    }

    /// Submit queued input until the encoder reports it is full.
    /// Returns whether anything was accepted.
    pub fn feed(&mut self) -> CompressResult<bool> {
        if self.state == EncodeState::NotStarted {
            return Ok(false);
        }
        let mut accepted = false;
        while let Some(input) = self.pending.pop_front() {
            let is_eos = matches!(input, EncoderInput::EndOfStream { .. });
            match self.encoder.get_mut()?.submit(input, self.input_wait)? {
                Submit::Accepted => {
                    accepted = true;
                    if is_eos {
                        debug!(kind = %self.kind, "end of input submitted to encoder");
                    }
                }
                Submit::Busy(input) => {
                    trace!(kind = %self.kind, queued = self.pending.len() + 1, "encoder input full");
                    self.pending.push_front(input);
                    break;
                }
            }
        }
        Ok(accepted)
    }

    /// Tell a surface-fed encoder no more frames will arrive. Idempotent.
    pub fn signal_end_of_input(&mut self) -> CompressResult<()> {
        if self.input_closed {
            return Ok(());
        }
        self.encoder.get_mut()?.signal_end_of_input_stream()?;
        self.input_closed = true;
        debug!(kind = %self.kind, "end of input signalled to encoder");
        Ok(())
    }

    /// Poll the encoder for one output unit and route it to the container.
    /// Returns whether anything happened.
    pub fn drain_output<M>(&mut self, mux: &mut MuxCoordinator<M>) -> CompressResult<bool>
    where
        M: Muxer<Params = E::Params>,
    {
        let mut active = self.flush_held(mux)?;
        if matches!(self.state, EncodeState::NotStarted | EncodeState::Done) {
            return Ok(active);
        }

        let polled = self.encoder.get_mut()?.poll_output()?;
        match polled {
            EncoderPoll::TryAgainLater => {}
            EncoderPoll::FormatChanged(format) => {
                if self.track.is_some() {
                    return Err(CompressError::codec(
                        Stage::encoder(self.kind),
                        "output format changed twice",
                    ));
                }
                debug!(kind = %self.kind, codec = %format.summary.codec, "encoder output format negotiated");
                self.track = Some(mux.register_track(&format)?);
                self.state = EncodeState::AwaitingFormat;
                mux.maybe_start()?;
                self.flush_held(mux)?;
                active = true;
            }
            EncoderPoll::Sample(sample) => {
                active = true;
                let end_of_stream = sample.flags.end_of_stream;
                if sample.mux_size() > 0 {
                    self.route(sample, mux)?;
                } else if sample.flags.codec_config {
                    trace!(kind = %self.kind, "codec config sample skipped");
                }
                if end_of_stream {
                    debug!(kind = %self.kind, "encoder reached end of stream");
                    self.state = EncodeState::Done;
                    self.flush_held(mux)?;
                }
            }
        }
        Ok(active)
    }

    /// Write held samples once the container runs and close the output track
    /// after end of stream. Returns whether anything was written.
    pub fn flush_held<M>(&mut self, mux: &mut MuxCoordinator<M>) -> CompressResult<bool>
    where
        M: Muxer<Params = E::Params>,
    {
        let Some(track) = self.track else {
            return Ok(false);
        };
        if !mux.is_started() {
            return Ok(false);
        }
        if self.state == EncodeState::AwaitingFormat {
            self.state = EncodeState::Emitting;
        }

        let flushed = !self.held.is_empty();
        while let Some(sample) = self.held.pop_front() {
            mux.write_sample(track, &sample)?;
        }
        if self.state == EncodeState::Done && !self.track_ended {
            mux.end_track(track);
            self.track_ended = true;
        }
        Ok(flushed)
    }

    fn route<M>(&mut self, sample: Sample, mux: &mut MuxCoordinator<M>) -> CompressResult<()>
    where
        M: Muxer<Params = E::Params>,
    {
        let Some(track) = self.track else {
            return Err(CompressError::codec(
                Stage::encoder(self.kind),
                "sample produced before the output format",
            ));
        };
        if mux.is_started() {
            mux.write_sample(track, &sample)
        } else {
            trace!(kind = %self.kind, pts_us = sample.pts_us, "holding sample until container starts");
            self.held.push_back(sample);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockBackend, MockEncoder, MockTuning};
    use crate::domain::model::{AudioEncoderSettings, FormatSummary, NegotiatedFormat};
    use crate::ports::CodecBackend;
    use tempfile::TempDir;

    const LAYOUT: PcmLayout = PcmLayout {
        bytes_per_frame: 4,
        sample_rate: 44_100,
    };

    fn audio_stage(backend: &MockBackend) -> EncodeStage<MockEncoder> {
        let settings = AudioEncoderSettings {
            sample_rate: 44_100,
            channels: 2,
            bitrate: 64_000,
        };
        let encoder = backend.create_audio_encoder(&settings).unwrap();
        EncodeStage::audio(Guarded::new(Stage::AudioEncoder, encoder), LAYOUT, Duration::ZERO)
    }

    fn pending_pts(stage: &EncodeStage<MockEncoder>) -> Vec<(usize, i64)> {
        stage
            .pending
            .iter()
            .filter_map(|input| match input {
                EncoderInput::Pcm { data, pts_us } => Some((data.len(), *pts_us)),
                EncoderInput::EndOfStream { .. } => None,
            })
            .collect()
    }

    fn video_format() -> NegotiatedFormat<()> {
        NegotiatedFormat {
            summary: FormatSummary {
                kind: MediaKind::Video,
                codec: "h264".into(),
                width: Some(640),
                height: Some(480),
                sample_rate: None,
                channels: None,
                bitrate: 500_000,
            },
            params: (),
        }
    }

    #[test]
    fn test_push_pcm_splits_to_capacity() {
        let backend = MockBackend::new();
        let mut stage = audio_stage(&backend);

        stage.push_pcm(&[0u8; 5000], 1_000).unwrap();

        let second = 1_000 + rules::pcm_offset_us(2048, 4, 44_100);
        let third = 1_000 + rules::pcm_offset_us(4096, 4, 44_100);
        assert_eq!(pending_pts(&stage), vec![(2048, 1_000), (2048, second), (904, third)]);
    }

    #[test]
    fn test_push_pcm_never_moves_backwards() {
        let backend = MockBackend::new();
        let mut stage = audio_stage(&backend);

        stage.push_pcm(&[0u8; 1024], 50_000).unwrap();
        stage.push_pcm(&[0u8; 1024], 10_000).unwrap();

        assert_eq!(pending_pts(&stage), vec![(1024, 50_000), (1024, 50_000)]);
    }

    #[test]
    fn test_push_pcm_rejected_after_end_of_stream() {
        let backend = MockBackend::new();
        let mut stage = audio_stage(&backend);

        stage.push_end_of_stream(0).unwrap();
        assert!(stage.push_pcm(&[0u8; 16], 0).is_err());
    }

    #[test]
    fn test_push_pcm_rejected_by_surface_stage() {
        let backend = MockBackend::new();
        let settings = crate::domain::model::VideoEncoderSettings {
            width: 640,
            height: 480,
            bitrate: 500_000,
            frame_rate: 25,
            i_frame_interval_secs: 5,
            preset: "veryfast".into(),
            threads: 1,
        };
        let encoder = backend.create_video_encoder(&settings).unwrap();
        let mut stage = EncodeStage::video(Guarded::new(Stage::VideoEncoder, encoder));

        assert!(stage.push_pcm(&[0u8; 16], 0).is_err());
    }

    #[test]
    fn test_feed_keeps_input_the_encoder_refuses() {
        let backend = MockBackend::new().with_tuning(MockTuning {
            encoder_slots: 4,
            ..MockTuning::default()
        });
        let mut stage = audio_stage(&backend);
        stage.push_pcm(&[0u8; 6 * 2048], 0).unwrap();

        // Nothing is submitted before start
        assert!(!stage.feed().unwrap());
        assert_eq!(stage.pending.len(), 6);

        stage.start().unwrap();
        assert!(stage.feed().unwrap());
        assert!(stage.is_backlogged());
        assert_eq!(stage.pending.len(), 2);
        assert!(!stage.feed().unwrap());
    }

    #[test]
    fn test_samples_held_until_container_starts() {
        let dir = TempDir::new().unwrap();
        let backend = MockBackend::new();
        let mut mux = MuxCoordinator::new(
            backend.create_muxer(&dir.path().join("out.mp4")).unwrap(),
            vec![MediaKind::Video, MediaKind::Audio],
        );
        let mut stage = audio_stage(&backend);
        stage.start().unwrap();
        stage.push_pcm(&[0u8; 4096], 0).unwrap();
        stage.feed().unwrap();

        for _ in 0..4 {
            stage.drain_output(&mut mux).unwrap();
        }
        assert_eq!(stage.state(), EncodeState::AwaitingFormat);
        assert_eq!(stage.held_samples(), 2);
        assert!(!mux.is_started());

        mux.register_track(&video_format()).unwrap();
        mux.maybe_start().unwrap();
        assert!(stage.flush_held(&mut mux).unwrap());

        assert_eq!(stage.state(), EncodeState::Emitting);
        assert_eq!(stage.held_samples(), 0);
        // The codec-config sample never reaches the container
        assert_eq!(mux.report(MediaKind::Audio).unwrap().samples_written, 2);
    }

    #[test]
    fn test_end_of_stream_closes_output_track() {
        let dir = TempDir::new().unwrap();
        let backend = MockBackend::new();
        let mut mux = MuxCoordinator::new(
            backend.create_muxer(&dir.path().join("out.mp4")).unwrap(),
            vec![MediaKind::Audio],
        );
        let mut stage = audio_stage(&backend);
        stage.start().unwrap();
        stage.push_pcm(&[0u8; 2048], 0).unwrap();
        stage.push_end_of_stream(0).unwrap();
        stage.feed().unwrap();

        let mut polls = 0;
        while !stage.reached_eos() {
            stage.drain_output(&mut mux).unwrap();
            polls += 1;
            assert!(polls < 20, "encoder never reached end of stream");
        }

        assert!(mux.all_tracks_ended());
        assert_eq!(mux.report(MediaKind::Audio).unwrap().samples_written, 1);
        assert!(!stage.drain_output(&mut mux).unwrap());
    }
}
