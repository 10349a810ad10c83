// Adapters - External system implementations

pub mod fs_local;
pub mod libav;
pub mod mock;
pub mod toml_config;
pub mod tracing_log;

// Re-export adapters
pub use fs_local::LocalFs;
pub use libav::LibavBackend;
pub use mock::MockBackend;
pub use toml_config::AppConfig;
pub use tracing_log::init_logging;
