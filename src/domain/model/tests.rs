// Unit tests for domain models

use super::*;

#[test]
fn test_quality_table_is_exact() {
    let low = QualityProfile::for_tier(QualityTier::Low);
    assert_eq!((low.width, low.height), (640, 480));
    assert_eq!(low.video_bitrate, 500_000);
    assert_eq!(low.audio_bitrate, 64_000);

    let medium = QualityProfile::for_tier(QualityTier::Medium);
    assert_eq!((medium.width, medium.height), (960, 540));
    assert_eq!(medium.video_bitrate, 1_000_000);
    assert_eq!(medium.audio_bitrate, 96_000);

    let high = QualityProfile::for_tier(QualityTier::High);
    assert_eq!((high.width, high.height), (1280, 720));
    assert_eq!(high.video_bitrate, 2_000_000);
    assert_eq!(high.audio_bitrate, 128_000);
}

#[test]
fn test_quality_table_is_stable_across_calls() {
    for tier in QualityTier::ALL {
        assert_eq!(QualityProfile::for_tier(tier), QualityProfile::for_tier(tier));
        assert_eq!(QualityProfile::resolve(tier.as_str()), QualityProfile::for_tier(tier));
    }
}

#[test]
fn test_quality_parse_falls_back_to_high() {
    assert_eq!(QualityTier::parse("low"), QualityTier::Low);
    assert_eq!(QualityTier::parse(" Medium "), QualityTier::Medium);
    assert_eq!(QualityTier::parse("ultra"), QualityTier::High);
    assert_eq!(QualityTier::parse(""), QualityTier::High);
    assert_eq!("LOW".parse::<QualityTier>().unwrap(), QualityTier::Low);
    assert_eq!(QualityTier::default(), QualityTier::High);
}

#[test]
fn test_track_kind_from_mime() {
    let track = TrackInfo {
        index: 1,
        mime: "audio/mp4a-latm".into(),
        duration_us: Some(0),
        sample_rate: Some(48_000),
        channels: Some(1),
        width: None,
        height: None,
    };
    assert_eq!(track.kind(), Some(MediaKind::Audio));
    assert!(!track.is(MediaKind::Video));
    assert_eq!(track.known_duration_us(), None);
}

#[test]
fn test_audio_settings_default_when_source_silent() {
    let track = TrackInfo {
        index: 0,
        mime: "audio/raw".into(),
        duration_us: None,
        sample_rate: None,
        channels: Some(0),
        width: None,
        height: None,
    };
    let settings = AudioEncoderSettings::for_source(&track, 64_000);
    assert_eq!(settings.sample_rate, 44_100);
    assert_eq!(settings.channels, 2);
    assert_eq!(settings.bytes_per_frame(), 4);
}

#[test]
fn test_audio_settings_downmix_surround_to_stereo() {
    let track = TrackInfo {
        index: 1,
        mime: "audio/ac3".into(),
        duration_us: Some(1_000_000),
        sample_rate: Some(48_000),
        channels: Some(6),
        width: None,
        height: None,
    };
    let settings = AudioEncoderSettings::for_source(&track, 128_000);
    assert_eq!(settings.sample_rate, 48_000);
    assert_eq!(settings.channels, 2);
}

#[test]
fn test_codec_config_sample_has_no_mux_payload() {
    let config = Sample::new(vec![0, 0, 0, 1], 0).with_flags(SampleFlags::CODEC_CONFIG);
    assert_eq!(config.mux_size(), 0);
    let frame = Sample::new(vec![1, 2, 3], 40_000).with_flags(SampleFlags::KEY_FRAME);
    assert_eq!(frame.mux_size(), 3);
}

#[test]
fn test_gop_size_from_frame_rate() {
    let settings = VideoEncoderSettings {
        width: 640,
        height: 480,
        bitrate: 500_000,
        frame_rate: 25,
        i_frame_interval_secs: 5,
        preset: "veryfast".into(),
        threads: 1,
    };
    assert_eq!(settings.gop_size(), 125);
}
