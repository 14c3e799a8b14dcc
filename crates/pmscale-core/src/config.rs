//! pmscale.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating a [`ScaleConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Autoscaler settings. Every key is optional in the TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScaleConfig {
    /// Width of the per-worker CPU/memory sampling window.
    pub average_worker_resources_over_seconds: u64,
    /// Enables periodic diagnostic logging.
    pub debug: bool,
    /// Hard cap on workers per application; `<= 0` means host cores - 1.
    pub max_workers: i64,
    pub min_seconds_to_add_worker: u64,
    pub min_seconds_to_release_worker: u64,
    /// Average CPU % below which a worker is released.
    pub release_cpu_threshold: f64,
    /// Max CPU % at which workers are added. Also the target average.
    pub scale_cpu_threshold: f64,
    /// How long a scale command may stay in flight before it is abandoned.
    pub scale_command_timeout_seconds: u64,
    /// Sampling tick.
    pub worker_check_interval_ms: u64,
    /// Diagnostics tick, only used when `debug` is set.
    pub show_stat_interval_seconds: u64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            average_worker_resources_over_seconds: 10,
            debug: false,
            max_workers: 0,
            min_seconds_to_add_worker: 30,
            min_seconds_to_release_worker: 600,
            release_cpu_threshold: 5.0,
            scale_cpu_threshold: 30.0,
            scale_command_timeout_seconds: 120,
            worker_check_interval_ms: 1000,
            show_stat_interval_seconds: 10,
        }
    }
}

impl ScaleConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate config from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ScaleConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scale_cpu_threshold.is_nan() || self.scale_cpu_threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "scale_cpu_threshold must be positive, got {}",
                self.scale_cpu_threshold
            )));
        }
        if self.release_cpu_threshold.is_nan() || self.release_cpu_threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "release_cpu_threshold must not be negative, got {}",
                self.release_cpu_threshold
            )));
        }
        if self.release_cpu_threshold >= self.scale_cpu_threshold {
            return Err(ConfigError::Invalid(format!(
                "release_cpu_threshold ({}) must be below scale_cpu_threshold ({})",
                self.release_cpu_threshold, self.scale_cpu_threshold
            )));
        }
        if self.average_worker_resources_over_seconds == 0 {
            return Err(ConfigError::Invalid(
                "average_worker_resources_over_seconds must be positive".to_string(),
            ));
        }
        if self.worker_check_interval_ms == 0 || self.show_stat_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "check intervals must be positive".to_string(),
            ));
        }
        if self.scale_command_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "scale_command_timeout_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Sampling window in milliseconds.
    pub fn window_millis(&self) -> u64 {
        self.average_worker_resources_over_seconds.saturating_mul(1000)
    }

    /// Effective worker cap for a host with `cpu_cores` logical cores.
    pub fn worker_cap(&self, cpu_cores: u32) -> u32 {
        if self.max_workers > 0 {
            u32::try_from(self.max_workers).unwrap_or(u32::MAX)
        } else {
            cpu_cores.saturating_sub(1)
        }
    }

    pub fn worker_check_interval(&self) -> Duration {
        Duration::from_millis(self.worker_check_interval_ms)
    }

    pub fn show_stat_interval(&self) -> Duration {
        Duration::from_secs(self.show_stat_interval_seconds)
    }

    pub fn scale_command_timeout(&self) -> Duration {
        Duration::from_secs(self.scale_command_timeout_seconds)
    }
}
