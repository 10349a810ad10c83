//! Decode stage: compressed samples in, frames or PCM out

use tracing::{debug, trace};

use crate::domain::model::MediaKind;
use crate::engine::encode::EncodeStage;
use crate::engine::lifecycle::Guarded;
use crate::error::CompressResult;
use crate::ports::{DecoderInput, DecoderPoll, Demuxer, Decoder, Encoder, Submit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    NotStarted,
    /// Pulling samples from the demuxer
    Feeding,
    /// End of input submitted, waiting for the decoder to flush
    Draining,
    Done,
}

/// What a `feed` call did this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Decoder full or input already complete
    Idle,
    Submitted { pts_us: i64 },
    /// End-of-stream marker accepted by the decoder
    EndOfInput,
}

pub struct DecodeStage<D: Decoder> {
    kind: MediaKind,
    decoder: Guarded<D>,
    state: DecodeState,
    pending: Option<DecoderInput>,
    last_output_pts_us: i64,
    buffers_out: u64,
}

impl<D: Decoder> DecodeStage<D> {
    pub fn new(kind: MediaKind, decoder: Guarded<D>) -> Self {
        Self {
            kind,
            decoder,
            state: DecodeState::NotStarted,
            pending: None,
            last_output_pts_us: 0,
            buffers_out: 0,
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == DecodeState::Done
    }

    pub fn buffers_out(&self) -> u64 {
        self.buffers_out
    }

    pub fn close(&mut self) -> CompressResult<()> {
        self.decoder.close()
    }

    pub fn start(&mut self) -> CompressResult<()> {
        if self.state != DecodeState::NotStarted {
            return Ok(());
        }
        self.decoder.start_with(|decoder| decoder.start())?;
        self.state = DecodeState::Feeding;
        debug!(kind = %self.kind, "decode stage started");
        Ok(())
    }

    /// Move one sample (or the end-of-stream marker) from the demuxer into the
    /// decoder. A full decoder keeps the input for the next tick.
    pub fn feed<X: Demuxer + ?Sized>(&mut self, demuxer: &mut X) -> CompressResult<FeedOutcome> {
        if self.state != DecodeState::Feeding {
            return Ok(FeedOutcome::Idle);
        }

        let input = match self.pending.take() {
            Some(input) => input,
            None => match demuxer.read_sample()? {
                Some(sample) => DecoderInput::Sample(sample),
                None => DecoderInput::EndOfStream,
            },
        };
        let pts_us = match &input {
            DecoderInput::Sample(sample) => Some(sample.pts_us),
            DecoderInput::EndOfStream => None,
        };

        match self.decoder.get_mut()?.submit(input)? {
            Submit::Accepted => match pts_us {
                Some(pts_us) => Ok(FeedOutcome::Submitted { pts_us }),
                None => {
                    debug!(kind = %self.kind, "end of input submitted to decoder");
                    self.state = DecodeState::Draining;
                    Ok(FeedOutcome::EndOfInput)
                }
            },
            Submit::Busy(input) => {
                self.pending = Some(input);
                Ok(FeedOutcome::Idle)
            }
        }
    }

    /// Poll one decoded unit and hand it to the paired encoder.
    ///
    /// Video frames are rendered to the encoder's surface; decoder end of
    /// stream is then signalled to the encoder explicitly. Audio PCM is queued
    /// on the encoder, and polling pauses while that queue is backlogged.
    /// Returns whether anything happened.
    pub fn drain<E: Encoder>(&mut self, encoder: &mut EncodeStage<E>) -> CompressResult<bool> {
        if matches!(self.state, DecodeState::NotStarted | DecodeState::Done) {
            return Ok(false);
        }
        if self.kind == MediaKind::Audio && encoder.is_backlogged() {
            return Ok(false);
        }

        let polled = self.decoder.get_mut()?.poll_output()?;
        let buffer = match polled {
            DecoderPoll::TryAgainLater => return Ok(false),
            DecoderPoll::FormatChanged => {
                debug!(kind = %self.kind, "decoder output format changed");
                return Ok(true);
            }
            DecoderPoll::Buffer(buffer) => buffer,
        };

        self.buffers_out += 1;
        self.last_output_pts_us = self.last_output_pts_us.max(buffer.pts_us);
        match self.kind {
            MediaKind::Video => {
                self.decoder.get_mut()?.release_output(buffer.size > 0)?;
                if buffer.end_of_stream {
                    self.finish();
                    encoder.signal_end_of_input()?;
                }
            }
            MediaKind::Audio => {
                if buffer.size > 0 {
                    trace!(pts_us = buffer.pts_us, bytes = buffer.pcm.len(), "pcm chunk decoded");
                    encoder.push_pcm(&buffer.pcm, buffer.pts_us)?;
                }
                self.decoder.get_mut()?.release_output(false)?;
                if buffer.end_of_stream {
                    self.finish();
                    encoder.push_end_of_stream(self.last_output_pts_us)?;
                }
            }
        }
        Ok(true)
    }

    fn finish(&mut self) {
        debug!(kind = %self.kind, buffers = self.buffers_out, "decoder reached end of stream");
        self.state = DecodeState::Done;
    }
}
