//! Transcode pipeline engine
//!
//! Each stage is an explicit state machine that the [`driver::PipelineDriver`]
//! polls once per tick. A stage that has nothing to do returns immediately so
//! no track pipeline can starve another.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod decode;
pub mod driver;
pub mod encode;
pub mod lifecycle;
pub mod mux;
pub mod progress;
pub mod selector;

pub use driver::PipelineDriver;
pub use progress::{JobNotifier, ProgressTracker};

/// Pipeline engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Output video frame rate
    pub frame_rate: u32,
    /// Seconds between forced key frames
    pub i_frame_interval_secs: u32,
    /// x264 speed preset
    pub encoder_preset: String,
    /// Encoder worker threads
    pub encoder_threads: usize,
    /// Longest wait for a free encoder input slot, in milliseconds
    pub input_wait_ms: u64,
    /// Sleep after a tick in which no stage made progress, in milliseconds
    pub idle_backoff_ms: u64,
    /// Consecutive idle ticks tolerated before the job is declared stalled
    pub max_idle_ticks: u64,
}

impl EngineConfig {
    pub fn input_wait(&self) -> Duration {
        Duration::from_millis(self.input_wait_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_rate: 25,
            i_frame_interval_secs: 5,
            encoder_preset: "veryfast".to_string(),
            encoder_threads: num_cpus::get(),
            input_wait_ms: 10,
            idle_backoff_ms: 1,
            max_idle_ticks: 5000,
        }
    }
}
