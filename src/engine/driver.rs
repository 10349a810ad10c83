//! Pipeline driver: opens every resource, ticks all stages, shuts down in order

use std::thread;
use tracing::{debug, info, warn};

use crate::domain::model::*;
use crate::domain::rules;
use crate::engine::decode::{DecodeStage, FeedOutcome};
use crate::engine::encode::{EncodeStage, PcmLayout};
use crate::engine::lifecycle::{FirstError, Guarded};
use crate::engine::mux::MuxCoordinator;
use crate::engine::progress::ProgressTracker;
use crate::engine::selector::select_track;
use crate::engine::EngineConfig;
use crate::error::{CompressError, CompressResult, Stage};
use crate::ports::*;

/// Every native resource of one job.
///
/// Fields are declared in release order (container, encoders, decoders,
/// surface, demuxers) so that `close_all` and plain drop agree.
struct TranscodeSession<B: CodecBackend> {
    mux: Option<MuxCoordinator<B::Muxer>>,
    video_encode: Option<EncodeStage<B::Encoder>>,
    audio_encode: Option<EncodeStage<B::Encoder>>,
    video_decode: Option<DecodeStage<B::Decoder>>,
    audio_decode: Option<DecodeStage<B::Decoder>>,
    surface: Option<Guarded<B::Surface>>,
    video_demuxer: Option<Guarded<B::Demuxer>>,
    audio_demuxer: Option<Guarded<B::Demuxer>>,
}

impl<B: CodecBackend> TranscodeSession<B> {
    fn new() -> Self {
        Self {
            mux: None,
            video_encode: None,
            audio_encode: None,
            video_decode: None,
            audio_decode: None,
            surface: None,
            video_demuxer: None,
            audio_demuxer: None,
        }
    }

    /// Single finalizer for both success and failure: finalize the container,
    /// then stop and release encoders, decoders, surface and demuxers.
    fn close_all(&mut self) -> CompressResult<()> {
        let mut first = FirstError::default();
        if let Some(mut mux) = self.mux.take() {
            first.record(mux.finish());
        }
        for mut stage in [self.video_encode.take(), self.audio_encode.take()].into_iter().flatten() {
            first.record(stage.close());
        }
        for mut stage in [self.video_decode.take(), self.audio_decode.take()].into_iter().flatten() {
            first.record(stage.close());
        }
        if let Some(mut surface) = self.surface.take() {
            first.record(surface.close());
        }
        for mut demuxer in [self.video_demuxer.take(), self.audio_demuxer.take()].into_iter().flatten() {
            first.record(demuxer.close());
        }
        first.into_result()
    }
}

/// What the loop needs to know about the selected tracks
struct TrackPlan {
    video: TrackInfo,
    audio: Option<TrackInfo>,
}

/// Runs one transcode from source to destination on the calling thread
pub struct PipelineDriver<'a, B: CodecBackend> {
    backend: &'a B,
    config: &'a EngineConfig,
}

impl<'a, B: CodecBackend> PipelineDriver<'a, B> {
    pub fn new(backend: &'a B, config: &'a EngineConfig) -> Self {
        Self { backend, config }
    }

    /// Transcode `request.source` into `request.destination`.
    ///
    /// Progress goes to `progress` as it advances, capped at 99; the caller
    /// reports completion. Every resource opened is released before this
    /// returns, and cleanup failures never replace the original error.
    pub fn run(&self, request: &TranscodeRequest, progress: &dyn ProgressSink) -> CompressResult<TranscodeSummary> {
        info!(
            source = %request.source.display(),
            tier = %request.tier,
            "transcode started"
        );
        let mut session = TranscodeSession::<B>::new();
        let outcome = self
            .open(&mut session, request)
            .and_then(|plan| self.pump(&mut session, &plan, progress));

        match outcome {
            Ok(summary) => {
                session.close_all()?;
                info!(
                    video_samples = summary.video.samples_written,
                    audio_samples = summary.audio.as_ref().map_or(0, |a| a.samples_written),
                    ticks = summary.ticks,
                    "transcode finished"
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(cleanup) = session.close_all() {
                    debug!(error = %cleanup, "cleanup after failure reported an error");
                }
                warn!(error = %e, "transcode failed");
                Err(e)
            }
        }
    }

    fn open(&self, session: &mut TranscodeSession<B>, request: &TranscodeRequest) -> CompressResult<TrackPlan> {
        let profile = request.profile();

        // Input checks come first so a bad source never opens a codec.
        let video_demuxer = session
            .video_demuxer
            .insert(Guarded::new(Stage::VideoDemuxer, self.backend.open_demuxer(&request.source)?));
        let video_index = select_track(video_demuxer.get()?, MediaKind::Video)?.ok_or_else(|| {
            CompressError::NoVideoTrack {
                path: request.source.display().to_string(),
            }
        })?;
        let video = video_demuxer.get()?.track_info(video_index)?;
        video_demuxer.get_mut()?.select_track(video_index)?;

        let mut audio_demuxer = Guarded::new(Stage::AudioDemuxer, self.backend.open_demuxer(&request.source)?);
        let audio = match select_track(audio_demuxer.get()?, MediaKind::Audio)? {
            Some(index) => {
                let info = audio_demuxer.get()?.track_info(index)?;
                audio_demuxer.get_mut()?.select_track(index)?;
                session.audio_demuxer = Some(audio_demuxer);
                Some(info)
            }
            None => {
                debug!("source has no audio track");
                audio_demuxer.close()?;
                None
            }
        };
        debug!(
            video = %video.mime,
            audio = audio.as_ref().map_or("none", |a| a.mime.as_str()),
            "tracks selected"
        );

        let video_settings = VideoEncoderSettings {
            width: profile.width,
            height: profile.height,
            bitrate: profile.video_bitrate,
            frame_rate: self.config.frame_rate,
            i_frame_interval_secs: self.config.i_frame_interval_secs,
            preset: self.config.encoder_preset.clone(),
            threads: self.config.encoder_threads,
        };
        let mut video_encoder = Guarded::new(
            Stage::VideoEncoder,
            self.backend.create_video_encoder(&video_settings)?,
        );
        let surface = session.surface.insert(Guarded::new(
            Stage::InputSurface,
            video_encoder.get_mut()?.create_input_surface()?,
        ));
        let video_encode = session.video_encode.insert(EncodeStage::video(video_encoder));
        video_encode.start()?;

        let video_decoder = self.backend.create_decoder(
            session
                .video_demuxer
                .as_ref()
                .ok_or_else(|| missing("video demuxer"))?
                .get()?,
            video_index,
            Some(surface.get()?),
        )?;
        session
            .video_decode
            .insert(DecodeStage::new(MediaKind::Video, Guarded::new(Stage::VideoDecoder, video_decoder)))
            .start()?;

        if let (Some(info), Some(demuxer)) = (&audio, &session.audio_demuxer) {
            let audio_decoder = self.backend.create_decoder(demuxer.get()?, info.index, None)?;
            session
                .audio_decode
                .insert(DecodeStage::new(MediaKind::Audio, Guarded::new(Stage::AudioDecoder, audio_decoder)))
                .start()?;

            let settings = AudioEncoderSettings::for_source(info, profile.audio_bitrate);
            let layout = PcmLayout {
                bytes_per_frame: settings.bytes_per_frame(),
                sample_rate: settings.sample_rate,
            };
            let audio_encoder = Guarded::new(Stage::AudioEncoder, self.backend.create_audio_encoder(&settings)?);
            session
                .audio_encode
                .insert(EncodeStage::audio(audio_encoder, layout, self.config.input_wait()))
                .start()?;
        }

        let mut expected = vec![MediaKind::Video];
        if audio.is_some() {
            expected.push(MediaKind::Audio);
        }
        let muxer = self.backend.create_muxer(&request.destination)?;
        session.mux = Some(MuxCoordinator::new(muxer, expected));

        Ok(TrackPlan { video, audio })
    }

    fn pump(
        &self,
        session: &mut TranscodeSession<B>,
        plan: &TrackPlan,
        progress: &dyn ProgressSink,
    ) -> CompressResult<TranscodeSummary> {
        let TranscodeSession {
            mux: Some(mux),
            video_encode: Some(video_encode),
            video_decode: Some(video_decode),
            video_demuxer: Some(video_demuxer),
            audio_encode,
            audio_decode,
            audio_demuxer,
            ..
        } = session
        else {
            return Err(missing("video pipeline"));
        };
        let video_demuxer = video_demuxer.get_mut()?;
        let mut audio = match (audio_decode.as_mut(), audio_encode.as_mut(), audio_demuxer.as_mut()) {
            (Some(decode), Some(encode), Some(demuxer)) => Some((decode, encode, demuxer.get_mut()?)),
            _ => None,
        };

        let total = rules::total_duration_us(&[
            plan.video.known_duration_us(),
            plan.audio.as_ref().and_then(TrackInfo::known_duration_us),
        ]);
        let mut tracker = ProgressTracker::new(plan.video.known_duration_us(), total);
        if let Some(percent) = tracker.begin() {
            progress.publish(percent);
        }

        let mut ticks: u64 = 0;
        let mut idle_ticks: u64 = 0;
        loop {
            // A source without audio counts as audio already done.
            let audio_done = audio.as_ref().map_or(true, |(_, encode, _)| encode.reached_eos());
            if video_encode.reached_eos() && audio_done {
                break;
            }
            ticks += 1;
            let mut active = false;

            match video_decode.feed(&mut *video_demuxer)? {
                FeedOutcome::Submitted { pts_us } => {
                    active = true;
                    if let Some(percent) = tracker.observe_video(pts_us) {
                        progress.publish(percent);
                    }
                }
                FeedOutcome::EndOfInput => active = true,
                FeedOutcome::Idle => {}
            }
            active |= video_decode.drain(video_encode)?;
            active |= video_encode.drain_output(mux)?;

            if let Some((decode, encode, demuxer)) = audio.as_mut() {
                match decode.feed(&mut **demuxer)? {
                    FeedOutcome::Submitted { pts_us } => {
                        active = true;
                        if let Some(percent) = tracker.observe_audio(pts_us) {
                            progress.publish(percent);
                        }
                    }
                    FeedOutcome::EndOfInput => active = true,
                    FeedOutcome::Idle => {}
                }
                active |= decode.drain(&mut **encode)?;
                active |= encode.feed()?;
                active |= encode.drain_output(mux)?;
            }

            if active {
                idle_ticks = 0;
                continue;
            }
            idle_ticks += 1;
            if idle_ticks >= self.config.max_idle_ticks {
                return Err(CompressError::Stalled { ticks: idle_ticks });
            }
            if !self.config.idle_backoff().is_zero() {
                thread::sleep(self.config.idle_backoff());
            }
        }

        video_encode.flush_held(mux)?;
        if let Some((_, encode, _)) = audio.as_mut() {
            encode.flush_held(mux)?;
        }
        debug!(ticks, percent = tracker.current(), "all track pipelines reached end of stream");

        Ok(TranscodeSummary {
            video: mux.report(MediaKind::Video).unwrap_or_default(),
            audio: plan.audio.as_ref().map(|_| mux.report(MediaKind::Audio).unwrap_or_default()),
            ticks,
        })
    }
}

fn missing(what: &str) -> CompressError {
    CompressError::Worker {
        message: format!("{what} missing from session"),
    }
}
