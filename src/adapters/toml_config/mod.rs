// TOML config adapter - Configuration management using TOML files
//
// Precedence: CLI flags > environment (VCOMPRESS_*) > config file > defaults.
// CLI flags are applied by the caller on top of what `AppConfig::load` returns.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::domain::model::QualityTier;
use crate::engine::EngineConfig;
use crate::error::{CompressError, CompressResult};

/// Config files tried, in order, when no explicit path is given
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["vcompress.toml", "config/vcompress.toml"];

/// Full application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub compressor: CompressorSection,
    pub logging: LoggingSection,
}

/// `[compressor]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorSection {
    pub default_quality: QualityTier,
    pub frame_rate: u32,
    pub i_frame_interval_secs: u32,
    pub input_wait_ms: u64,
    pub idle_backoff_ms: u64,
    pub max_idle_ticks: u64,
    /// Prefix of the temporary output written next to the source
    pub temp_prefix: String,
    pub encoder_preset: String,
    pub encoder_threads: usize,
    pub decoder_threads: usize,
}

impl Default for CompressorSection {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            default_quality: QualityTier::High,
            frame_rate: engine.frame_rate,
            i_frame_interval_secs: engine.i_frame_interval_secs,
            input_wait_ms: engine.input_wait_ms,
            idle_backoff_ms: engine.idle_backoff_ms,
            max_idle_ticks: engine.max_idle_ticks,
            temp_prefix: "temp_compressed_".to_string(),
            encoder_preset: engine.encoder_preset,
            encoder_threads: engine.encoder_threads,
            decoder_threads: num_cpus::get(),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load defaults, then the config file, then environment overrides.
    ///
    /// An explicit path must exist; the default locations are optional.
    pub fn load(explicit: Option<&Path>) -> CompressResult<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match DEFAULT_CONFIG_PATHS.iter().map(Path::new).find(|p| p.is_file()) {
                Some(path) => Self::from_file(path)?,
                None => {
                    debug!("no config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> CompressResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CompressError::Config {
            message: format!("failed to read config file {}: {}", path.display(), e),
        })?;
        let config = Self::from_toml(&content).map_err(|e| CompressError::Config {
            message: format!("{}: {}", path.display(), e),
        })?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> CompressResult<Self> {
        toml::from_str(content).map_err(|e| CompressError::Config {
            message: format!("failed to parse TOML config: {}", e),
        })
    }

    pub fn to_toml(&self) -> CompressResult<String> {
        toml::to_string_pretty(self).map_err(|e| CompressError::Config {
            message: format!("failed to serialize config: {}", e),
        })
    }

    /// Apply `VCOMPRESS_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> CompressResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let c = &mut self.compressor;
        let mut overrides = 0;

        if let Some(value) = lookup("VCOMPRESS_QUALITY") {
            c.default_quality = QualityTier::parse(&value);
            overrides += 1;
        }
        overrides += env_parse(&lookup, "VCOMPRESS_FRAME_RATE", &mut c.frame_rate)?;
        overrides += env_parse(&lookup, "VCOMPRESS_I_FRAME_INTERVAL", &mut c.i_frame_interval_secs)?;
        overrides += env_parse(&lookup, "VCOMPRESS_INPUT_WAIT_MS", &mut c.input_wait_ms)?;
        overrides += env_parse(&lookup, "VCOMPRESS_IDLE_BACKOFF_MS", &mut c.idle_backoff_ms)?;
        overrides += env_parse(&lookup, "VCOMPRESS_MAX_IDLE_TICKS", &mut c.max_idle_ticks)?;
        overrides += env_parse(&lookup, "VCOMPRESS_TEMP_PREFIX", &mut c.temp_prefix)?;
        overrides += env_parse(&lookup, "VCOMPRESS_ENCODER_PRESET", &mut c.encoder_preset)?;
        overrides += env_parse(&lookup, "VCOMPRESS_ENCODER_THREADS", &mut c.encoder_threads)?;
        overrides += env_parse(&lookup, "VCOMPRESS_DECODER_THREADS", &mut c.decoder_threads)?;
        overrides += env_parse(&lookup, "VCOMPRESS_LOG_LEVEL", &mut self.logging.level)?;
        overrides += env_parse(&lookup, "VCOMPRESS_LOG_JSON", &mut self.logging.json)?;

        if overrides > 0 {
            debug!(overrides, "applied environment overrides");
        }
        self.validate()
    }

    pub fn validate(&self) -> CompressResult<()> {
        let c = &self.compressor;
        if c.frame_rate == 0 {
            return Err(config_error("compressor.frame_rate must be positive"));
        }
        if c.i_frame_interval_secs == 0 {
            return Err(config_error("compressor.i_frame_interval_secs must be positive"));
        }
        if c.max_idle_ticks == 0 {
            return Err(config_error("compressor.max_idle_ticks must be positive"));
        }
        if c.temp_prefix.is_empty() {
            return Err(config_error("compressor.temp_prefix must not be empty"));
        }
        if tracing::Level::from_str(&self.logging.level).is_err() {
            return Err(config_error(&format!(
                "logging.level '{}' is not one of trace, debug, info, warn, error",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Engine settings derived from the `[compressor]` section
    pub fn engine_config(&self) -> EngineConfig {
        let c = &self.compressor;
        EngineConfig {
            frame_rate: c.frame_rate,
            i_frame_interval_secs: c.i_frame_interval_secs,
            encoder_preset: c.encoder_preset.clone(),
            encoder_threads: c.encoder_threads.max(1),
            input_wait_ms: c.input_wait_ms,
            idle_backoff_ms: c.idle_backoff_ms,
            max_idle_ticks: c.max_idle_ticks,
        }
    }
}

fn config_error(message: &str) -> CompressError {
    CompressError::Config {
        message: message.to_string(),
    }
}

fn env_parse<F, T>(lookup: &F, key: &str, slot: &mut T) -> CompressResult<usize>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(0);
    };
    *slot = raw.trim().parse().map_err(|e: T::Err| CompressError::Config {
        message: format!("invalid {key}='{raw}': {e}"),
    })?;
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.compressor.default_quality, QualityTier::High);
        assert_eq!(config.compressor.frame_rate, 25);
        assert_eq!(config.compressor.i_frame_interval_secs, 5);
        assert_eq!(config.compressor.temp_prefix, "temp_compressed_");
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [compressor]
            default_quality = "low"
            max_idle_ticks = 42

            [logging]
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.compressor.default_quality, QualityTier::Low);
        assert_eq!(config.compressor.max_idle_ticks, 42);
        assert_eq!(config.compressor.frame_rate, 25);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = AppConfig::from_toml("[compressor]\nframe_rate = 30\n").unwrap();
        let env: HashMap<&str, &str> = [
            ("VCOMPRESS_FRAME_RATE", "24"),
            ("VCOMPRESS_QUALITY", "Medium"),
            ("VCOMPRESS_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.compressor.frame_rate, 24);
        assert_eq!(config.compressor.default_quality, QualityTier::Medium);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(|key| (key == "VCOMPRESS_MAX_IDLE_TICKS").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, CompressError::Config { .. }));
        assert!(err.to_string().contains("VCOMPRESS_MAX_IDLE_TICKS"));
    }

    #[test]
    fn test_validation_rejects_zero_frame_rate() {
        let mut config = AppConfig::default();
        config.compressor.frame_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let err = AppConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, CompressError::Config { .. }));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vcompress.toml");
        let mut config = AppConfig::default();
        config.compressor.encoder_preset = "medium".to_string();
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = AppConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_engine_config_mirrors_section() {
        let mut config = AppConfig::default();
        config.compressor.max_idle_ticks = 7;
        config.compressor.encoder_threads = 0;
        let engine = config.engine_config();
        assert_eq!(engine.max_idle_ticks, 7);
        assert_eq!(engine.encoder_threads, 1);
        assert_eq!(engine.frame_rate, 25);
    }
}
