//! End-to-end pipeline tests against the scripted mock backend

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use video_compressor::adapters::mock::{
    MockBackend, MockContainer, MockFault, MockMedia, MockTrack, MockTuning, ResourceAction,
};
use video_compressor::adapters::LocalFs;
use video_compressor::app::{run_job, ChannelObserver, JobEvent};
use video_compressor::domain::model::{MediaKind, QualityTier, TranscodeRequest};
use video_compressor::engine::{EngineConfig, JobNotifier, PipelineDriver};
use video_compressor::error::{CompressError, ErrorKind, Stage};
use video_compressor::ports::NoProgress;

const ORIGINAL: &[u8] = b"original media bytes";

// Test utilities

struct Fixture {
    _dir: TempDir,
    source: PathBuf,
    backend: MockBackend,
    config: EngineConfig,
    fs: LocalFs,
}

impl Fixture {
    fn new(media: MockMedia) -> Self {
        Self::with_backend(MockBackend::new(), media)
    }

    fn with_backend(backend: MockBackend, media: MockMedia) -> Self {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("clip.mp4");
        fs::write(&source, ORIGINAL).unwrap();
        backend.register_source(source.clone(), media);
        Self {
            _dir: dir,
            source,
            backend,
            config: test_config(),
            fs: LocalFs::new("temp_compressed_"),
        }
    }

    fn request(&self, tier: QualityTier) -> TranscodeRequest {
        TranscodeRequest::new(&self.source, self.fs.temp_path_for(&self.source).unwrap(), tier)
    }

    /// Run a full job and collect every callback it produced
    fn run(&self, tier: QualityTier) -> (Result<video_compressor::JobReport, CompressError>, Vec<JobEvent>) {
        let (observer, events) = ChannelObserver::new();
        let notifier = JobNotifier::new(Box::new(observer));
        let result = run_job(&self.backend, &self.config, &self.fs, &self.request(tier), &notifier);
        (result, collect(events))
    }

    fn temp_path(&self) -> PathBuf {
        self.fs.temp_path_for(&self.source).unwrap()
    }

    fn assert_source_untouched(&self) {
        assert_eq!(fs::read(&self.source).unwrap(), ORIGINAL);
        assert!(!self.temp_path().exists(), "partial output left behind");
    }

    /// Every created resource was released exactly once
    fn assert_all_released_once(&self) {
        let log = self.backend.log();
        for label in log.created() {
            assert_eq!(log.count(&label, ResourceAction::Released), 1, "{label} release count");
        }
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        encoder_threads: 1,
        idle_backoff_ms: 0,
        max_idle_ticks: 50,
        ..EngineConfig::default()
    }
}

fn collect(mut events: UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn progress_values(events: &[JobEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect()
}

fn terminal_events(events: &[JobEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

fn read_container(path: &Path) -> MockContainer {
    MockContainer::read(path).unwrap()
}

fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    let diff = (actual - expected).abs() / expected;
    assert!(diff <= tolerance, "{actual} not within {tolerance} of {expected}");
}

// Successful jobs

#[test]
fn test_low_quality_replaces_source() {
    let fixture = Fixture::new(MockMedia::video_with_audio(10_000_000));

    let (result, events) = fixture.run(QualityTier::Low);
    let report = result.unwrap();

    assert_eq!(report.profile.width, 640);
    assert_eq!(report.profile.height, 480);
    assert_eq!(report.original_size, ORIGINAL.len() as u64);
    assert_eq!(report.compressed_size, fs::metadata(&fixture.source).unwrap().len());
    assert!(!fixture.temp_path().exists());

    let container = read_container(&fixture.source);
    let video = container.track(MediaKind::Video).unwrap();
    assert_eq!(video.format.codec, "h264");
    assert_eq!(video.format.width, Some(640));
    assert_eq!(video.format.height, Some(480));
    assert_eq!(video.samples.len(), 300);
    assert_close(video.bitrate_bps(), 500_000.0, 0.05);

    let audio = container.track(MediaKind::Audio).unwrap();
    assert_eq!(audio.format.codec, "aac");
    assert_eq!(audio.format.sample_rate, Some(44_100));
    assert_eq!(audio.format.channels, Some(2));
    assert_close(audio.bitrate_bps(), 64_000.0, 0.05);

    assert_eq!(events.last(), Some(&JobEvent::Succeeded(report)));
    assert_eq!(terminal_events(&events), 1);
}

#[test]
fn test_progress_is_monotonic_and_ends_at_100() {
    let fixture = Fixture::new(MockMedia::video_with_audio(3_000_000));

    let (result, events) = fixture.run(QualityTier::Medium);
    result.unwrap();

    let progress = progress_values(&events);
    assert_eq!(progress.first(), Some(&0));
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.windows(2).all(|w| w[0] < w[1]), "{progress:?}");
    assert!(progress[..progress.len() - 1].iter().all(|p| *p <= 99));

    // 100% comes right before the single success
    let n = events.len();
    assert_eq!(events[n - 2], JobEvent::Progress(100));
    assert!(matches!(events[n - 1], JobEvent::Succeeded(_)));
}

#[test]
fn test_unknown_durations_still_complete() {
    let media = MockMedia::new()
        .with_track(MockTrack::h264(1_000_000, 30, 1280, 720).without_duration())
        .with_track(MockTrack::aac(1_000_000, 48_000, 2).without_duration());
    let fixture = Fixture::new(media);

    let (result, events) = fixture.run(QualityTier::High);
    result.unwrap();

    let progress = progress_values(&events);
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(progress.last(), Some(&100));
}

#[test]
fn test_source_without_audio_writes_video_only() {
    let fixture = Fixture::new(MockMedia::video_only(1_000_000));

    let (result, events) = fixture.run(QualityTier::Low);
    let report = result.unwrap();

    assert!(report.summary.audio.is_none());
    assert_eq!(report.summary.video.samples_written, 30);
    let container = read_container(&fixture.source);
    assert_eq!(container.tracks.len(), 1);
    assert!(container.track(MediaKind::Audio).is_none());

    let log = fixture.backend.log();
    assert_eq!(log.count("audio decoder", ResourceAction::Created), 0);
    assert_eq!(log.count("audio encoder", ResourceAction::Created), 0);
    // The second demuxer probed for audio and was closed right away
    assert_eq!(log.count("demuxer 2", ResourceAction::Released), 1);
    fixture.assert_all_released_once();
    assert_eq!(terminal_events(&events), 1);
}

#[test]
fn test_extra_tracks_are_ignored() {
    let media = MockMedia::new()
        .with_track(MockTrack::subtitles())
        .with_track(MockTrack::aac(1_000_000, 44_100, 2))
        .with_track(MockTrack::h264(1_000_000, 30, 1920, 1080));
    let fixture = Fixture::new(media);

    let (result, _) = fixture.run(QualityTier::Low);
    result.unwrap();

    let container = read_container(&fixture.source);
    assert_eq!(container.tracks.len(), 2);
}

#[test]
fn test_resources_released_in_order() {
    let fixture = Fixture::new(MockMedia::video_with_audio(1_000_000));

    let (result, _) = fixture.run(QualityTier::Low);
    result.unwrap();

    assert_eq!(
        fixture.backend.log().release_order(),
        vec![
            "muxer",
            "video encoder",
            "audio encoder",
            "video decoder",
            "audio decoder",
            "input surface",
            "demuxer 1",
            "demuxer 2",
        ]
    );
    fixture.assert_all_released_once();
}

// Container start gating

fn run_with_format_delays(video_after: usize, audio_after: usize) -> Fixture {
    let backend = MockBackend::new().with_tuning(MockTuning {
        video_format_after: video_after,
        audio_format_after: audio_after,
        ..MockTuning::default()
    });
    let fixture = Fixture::with_backend(backend, MockMedia::video_with_audio(2_000_000));
    let (result, _) = fixture.run(QualityTier::Low);
    result.unwrap();
    fixture
}

fn assert_started_after_both_tracks(fixture: &Fixture) {
    let events = fixture.backend.log().events();
    let muxer: Vec<ResourceAction> = events
        .iter()
        .filter(|e| e.label == "muxer")
        .map(|e| e.action)
        .collect();

    assert_eq!(muxer.iter().filter(|a| **a == ResourceAction::Started).count(), 1);
    let start = muxer.iter().position(|a| *a == ResourceAction::Started).unwrap();
    let added: Vec<usize> = muxer
        .iter()
        .enumerate()
        .filter(|(_, a)| **a == ResourceAction::TrackAdded)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(added.len(), 2);
    assert!(added.iter().all(|i| *i < start));
    let first_write = muxer.iter().position(|a| *a == ResourceAction::SampleWritten).unwrap();
    assert!(first_write > start);

    // Nothing produced while waiting for the other track was lost:
    // 86 AAC packets of 1024 frames, each split into two encoder inputs
    let container = read_container(&fixture.source);
    let audio = container.track(MediaKind::Audio).unwrap();
    assert_eq!(audio.samples.len(), 172);
    assert_eq!(audio.samples[0].pts_us, 0);
    let video = container.track(MediaKind::Video).unwrap();
    assert_eq!(video.samples.len(), 60);
    assert_eq!(video.samples[0].pts_us, 0);
}

#[test]
fn test_container_starts_once_when_video_negotiates_last() {
    let fixture = run_with_format_delays(20, 1);
    assert_started_after_both_tracks(&fixture);
}

#[test]
fn test_container_starts_once_when_audio_negotiates_last() {
    let fixture = run_with_format_delays(1, 40);
    assert_started_after_both_tracks(&fixture);
}

#[test]
fn test_codec_config_never_reaches_container() {
    let fixture = Fixture::new(MockMedia::video_with_audio(1_000_000));

    let (result, _) = fixture.run(QualityTier::Low);
    result.unwrap();

    let container = read_container(&fixture.source);
    for track in &container.tracks {
        assert!(
            track.samples.iter().all(|s| s.size != 5),
            "codec config written to {:?} track",
            track.format.kind
        );
    }
    let video = container.track(MediaKind::Video).unwrap();
    assert!(video.samples[0].key_frame);
    assert!(video.samples.windows(2).all(|w| w[0].pts_us <= w[1].pts_us));
}

// Failures

#[test]
fn test_source_without_video_fails_before_any_codec() {
    let fixture = Fixture::new(MockMedia::audio_only(1_000_000));

    let (result, events) = fixture.run(QualityTier::Low);
    let err = result.unwrap_err();

    assert!(matches!(err, CompressError::NoVideoTrack { .. }));
    assert_eq!(err.kind(), ErrorKind::Input);
    assert_eq!(fixture.backend.log().created(), vec!["demuxer 1"]);
    fixture.assert_all_released_once();
    fixture.assert_source_untouched();
    assert_eq!(events, vec![JobEvent::Failed(err.to_string())]);
}

#[test]
fn test_unreadable_source_fails() {
    let fixture = Fixture::new(MockMedia::video_with_audio(1_000_000));
    fixture.backend.inject(MockFault::FailOpenDemuxer);

    let (result, events) = fixture.run(QualityTier::Low);

    assert!(matches!(result, Err(CompressError::SourceUnreadable { .. })));
    assert!(fixture.backend.log().created().is_empty());
    fixture.assert_source_untouched();
    assert_eq!(terminal_events(&events), 1);
}

#[test]
fn test_write_failure_releases_everything_once() {
    let fixture = Fixture::new(MockMedia::video_with_audio(2_000_000));
    fixture.backend.inject(MockFault::FailWriteAfter(10));

    let (result, events) = fixture.run(QualityTier::Low);

    assert!(matches!(result, Err(CompressError::Muxer { .. })));
    fixture.assert_all_released_once();
    fixture.assert_source_untouched();
    assert_eq!(terminal_events(&events), 1);
    assert!(matches!(events.last(), Some(JobEvent::Failed(_))));
    assert!(!progress_values(&events).contains(&100));
}

#[test]
fn test_cleanup_failure_does_not_mask_original_error() {
    let fixture = Fixture::new(MockMedia::video_with_audio(2_000_000));
    fixture.backend.inject(MockFault::FailWriteAfter(3));
    fixture.backend.inject(MockFault::FailRelease(Stage::VideoEncoder));
    fixture.backend.inject(MockFault::FailStop(Stage::AudioDecoder));

    let (result, _) = fixture.run(QualityTier::Low);

    match result {
        Err(CompressError::Muxer { message }) => assert!(message.contains("write failure")),
        other => panic!("expected the write failure, got {other:?}"),
    }
    fixture.assert_all_released_once();
    fixture.assert_source_untouched();
}

#[test]
fn test_encoder_start_failure_releases_opened_resources() {
    let fixture = Fixture::new(MockMedia::video_with_audio(1_000_000));
    fixture.backend.inject(MockFault::FailStart(Stage::AudioEncoder));

    let (result, _) = fixture.run(QualityTier::Low);

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CodecNegotiation);
    let log = fixture.backend.log();
    assert_eq!(log.count("muxer", ResourceAction::Created), 0);
    // Never started, so never stopped
    assert_eq!(log.count("audio encoder", ResourceAction::Stopped), 0);
    assert_eq!(log.count("video encoder", ResourceAction::Stopped), 1);
    fixture.assert_all_released_once();
    fixture.assert_source_untouched();
}

#[test]
fn test_stalled_pipeline_is_reported() {
    let backend = MockBackend::new().with_tuning(MockTuning {
        decoder_slots: 0,
        ..MockTuning::default()
    });
    let fixture = Fixture::with_backend(backend, MockMedia::video_only(1_000_000));

    let (result, _) = fixture.run(QualityTier::Low);

    let err = result.unwrap_err();
    assert!(matches!(err, CompressError::Stalled { ticks: 50 }));
    assert_eq!(err.kind(), ErrorKind::Stalled);
    fixture.assert_all_released_once();
    fixture.assert_source_untouched();
}

#[test]
fn test_driver_leaves_replacement_to_caller() {
    let fixture = Fixture::new(MockMedia::video_only(500_000));
    let request = fixture.request(QualityTier::Low);

    let summary = PipelineDriver::new(&fixture.backend, &fixture.config)
        .run(&request, &NoProgress)
        .unwrap();

    assert_eq!(summary.video.samples_written, 15);
    assert_eq!(fs::read(&fixture.source).unwrap(), ORIGINAL);
    assert!(read_container(&request.destination).track(MediaKind::Video).is_some());
}
