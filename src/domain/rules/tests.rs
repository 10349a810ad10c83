// Unit tests for business rules

use super::*;

#[test]
fn test_progress_is_clamped_below_completion() {
    assert_eq!(progress_percent(0, 10_000_000), 0);
    assert_eq!(progress_percent(5_000_000, 10_000_000), 50);
    assert_eq!(progress_percent(10_000_000, 10_000_000), 99);
    assert_eq!(progress_percent(25_000_000, 10_000_000), 99);
    assert_eq!(progress_percent(-40_000, 10_000_000), 0);
}

#[test]
fn test_progress_with_unknown_duration_saturates() {
    let denominator = video_progress_denominator(None, None);
    assert_eq!(denominator, 1);
    assert_eq!(progress_percent(40_000, denominator), 99);
}

#[test]
fn test_video_denominator_prefers_video_duration() {
    assert_eq!(video_progress_denominator(Some(8), Some(10)), 8);
    assert_eq!(video_progress_denominator(Some(0), Some(10)), 10);
    assert_eq!(video_progress_denominator(None, Some(10)), 10);
}

#[test]
fn test_total_duration_ignores_missing() {
    assert_eq!(total_duration_us(&[Some(3), None, Some(9)]), Some(9));
    assert_eq!(total_duration_us(&[None, Some(0)]), None);
}

#[test]
fn test_pcm_offset_from_consumed_bytes() {
    // 44.1kHz stereo: 4 bytes per frame, 4410 frames = 100ms
    assert_eq!(pcm_offset_us(4 * 4410, 4, 44_100), 100_000);
    assert_eq!(pcm_offset_us(0, 4, 44_100), 0);
    assert_eq!(pcm_offset_us(100, 0, 44_100), 0);
}

#[test]
fn test_pcm_chunk_len_keeps_whole_frames() {
    assert_eq!(pcm_chunk_len(10_000, 2048, 4), 2048);
    assert_eq!(pcm_chunk_len(10_000, 2046, 4), 2044);
    assert_eq!(pcm_chunk_len(100, 2048, 4), 100);
    assert_eq!(pcm_chunk_len(3, 2048, 4), 3);
}

#[test]
fn test_expected_track_count() {
    assert_eq!(expected_track_count(true, true), 2);
    assert_eq!(expected_track_count(true, false), 1);
}
