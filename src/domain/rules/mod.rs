// Business rules - Progress math, PCM timing and track accounting

/// Highest percentage reported while the pipeline is still running
pub const MAX_RUNNING_PERCENT: u8 = 99;

/// Percentage reported exactly once when the job completes
pub const COMPLETE_PERCENT: u8 = 100;

/// Progress for a presentation timestamp against a duration, clamped to `[0, 99]`
pub fn progress_percent(pts_us: i64, denominator_us: i64) -> u8 {
    let denominator = denominator_us.max(1) as i128;
    let raw = (pts_us.max(0) as i128 * 100) / denominator;
    raw.clamp(0, MAX_RUNNING_PERCENT as i128) as u8
}

/// Denominator used for video progress: video duration, else the longest
/// track, else 1
pub fn video_progress_denominator(video_duration_us: Option<i64>, total_duration_us: Option<i64>) -> i64 {
    video_duration_us
        .filter(|d| *d > 0)
        .or(total_duration_us.filter(|d| *d > 0))
        .unwrap_or(1)
}

/// Longest known duration across the selected tracks
pub fn total_duration_us(durations: &[Option<i64>]) -> Option<i64> {
    durations.iter().flatten().copied().filter(|d| *d > 0).max()
}

/// Time offset of `consumed_bytes` of interleaved 16-bit PCM into a chunk
pub fn pcm_offset_us(consumed_bytes: usize, bytes_per_frame: usize, sample_rate: u32) -> i64 {
    if bytes_per_frame == 0 || sample_rate == 0 {
        return 0;
    }
    let frames = (consumed_bytes / bytes_per_frame) as i64;
    frames * 1_000_000 / sample_rate as i64
}

/// Largest sub-chunk size not exceeding `capacity` that keeps whole PCM frames
pub fn pcm_chunk_len(remaining: usize, capacity: usize, bytes_per_frame: usize) -> usize {
    let capped = remaining.min(capacity);
    if bytes_per_frame == 0 || capped < bytes_per_frame {
        return capped;
    }
    capped - capped % bytes_per_frame
}

/// Number of output tracks the container must see before it may start
pub fn expected_track_count(has_video: bool, has_audio: bool) -> usize {
    has_video as usize + has_audio as usize
}

#[cfg(test)]
mod tests;
