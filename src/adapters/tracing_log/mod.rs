// Tracing log adapter - Structured logging using tracing crate

use tracing_subscriber::EnvFilter;

use crate::adapters::toml_config::LoggingSection;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
/// Returns false when a subscriber was already installed.
pub fn init_logging(logging: &LoggingSection) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("video_compressor={0},vcompress={0}", logging.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = if logging.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };
    if installed {
        tracing::debug!(level = %logging.level, json = logging.json, "logging initialized");
    }
    installed
}
