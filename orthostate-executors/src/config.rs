//!
//! Runtime Configuration
//!
//! Configuration is layered, each layer overriding the previous one:
//!
//! 1. Compile-time defaults
//! 2. An optional TOML file
//! 3. Environment variables (`ORTHOSTATE_*`)
//!
//! ```toml
//! [signal_detector]
//! loop_rate_hz = 20.0
//!
//! [scheduler]
//! idle_timeout_ms = 50
//! ```
//!

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Overrides [`SignalDetectorConfig::loop_rate_hz`]
pub const LOOP_RATE_ENV: &str = "ORTHOSTATE_SIGNAL_DETECTOR_LOOP_RATE_HZ";

/// Overrides [`SchedulerConfig::idle_timeout_ms`]
pub const IDLE_TIMEOUT_ENV: &str = "ORTHOSTATE_SCHEDULER_IDLE_TIMEOUT_MS";

/// Errors raised while loading the runtime configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        /// The file that was being read
        path: PathBuf,
        /// The underlying io error
        #[source]
        source: io::Error,
    },
    /// The configuration is not valid TOML for [`RuntimeConfig`]
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// An environment override could not be parsed
    #[error("invalid value for environment variable '{name}': {message}")]
    InvalidEnvVar {
        /// The variable name
        name: &'static str,
        /// Why the value was rejected
        message: String,
    },
    /// A value parsed but is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Signal detector settings
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignalDetectorConfig {
    /// How many times per second the registry is polled
    pub loop_rate_hz: f64,
}

impl Default for SignalDetectorConfig {
    fn default() -> Self {
        Self { loop_rate_hz: 20.0 }
    }
}

impl SignalDetectorConfig {
    /// The time between two polls
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.loop_rate_hz)
    }
}

/// Event scheduler settings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// How long the consumer blocks on an empty queue before re-checking
    /// whether it was stopped
    pub idle_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { idle_timeout_ms: 50 }
    }
}

impl SchedulerConfig {
    /// The idle timeout as a [`Duration`]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Settings for one running orthostate instance
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Signal detector settings
    pub signal_detector: SignalDetectorConfig,
    /// Event scheduler settings
    pub scheduler: SchedulerConfig,
}

impl RuntimeConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration from the defaults, an optional file and the
    /// process environment.
    ///
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// [`RuntimeConfig::load`] with an injected environment lookup
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = path {
            match fs::read_to_string(path) {
                Ok(document) => {
                    config = toml::from_str(&document)?;
                    debug!(path = %path.display(), "loaded runtime config");
                }
                Err(source) if source.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "runtime config file not found, using defaults");
                }
                Err(source) => {
                    return Err(ConfigError::ReadFile {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }

        config.apply_env_from(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the `ORTHOSTATE_*` overrides found through `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(LOOP_RATE_ENV) {
            self.signal_detector.loop_rate_hz =
                value.trim().parse().map_err(|error| ConfigError::InvalidEnvVar {
                    name: LOOP_RATE_ENV,
                    message: format!("expected a number of hertz: {error}"),
                })?;
        }

        if let Some(value) = lookup(IDLE_TIMEOUT_ENV) {
            self.scheduler.idle_timeout_ms =
                value.trim().parse().map_err(|error| ConfigError::InvalidEnvVar {
                    name: IDLE_TIMEOUT_ENV,
                    message: format!("expected a number of milliseconds: {error}"),
                })?;
        }

        Ok(())
    }

    /// Reject values the loops cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rate = self.signal_detector.loop_rate_hz;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "signal_detector.loop_rate_hz must be a positive number, got {rate}"
            )));
        }

        if self.scheduler.idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid(String::from(
                "scheduler.idle_timeout_ms must be greater than zero",
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn env(pairs: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |name: &str| vars.get(name).map(|value| value.to_string())
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();

        assert_eq!(config.signal_detector.loop_rate_hz, 20.0);
        assert_eq!(config.signal_detector.period(), Duration::from_millis(50));
        assert_eq!(config.scheduler.idle_timeout(), Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str("[signal_detector]\nloop_rate_hz = 100.0\n").unwrap();

        assert_eq!(config.signal_detector.loop_rate_hz, 100.0);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let error = RuntimeConfig::from_toml_str("[scheduler]\nidle_timeout = 10\n").unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn test_environment_overrides_file() {
        let path = std::env::temp_dir().join(format!("orthostate-config-{}.toml", std::process::id()));
        fs::write(&path, "[signal_detector]\nloop_rate_hz = 5.0\n\n[scheduler]\nidle_timeout_ms = 10\n").unwrap();

        let config = RuntimeConfig::load_with(Some(&path), env(&[(LOOP_RATE_ENV, " 40 ")])).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(config.signal_detector.loop_rate_hz, 40.0);
        assert_eq!(config.scheduler.idle_timeout_ms, 10);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = Path::new("/definitely/not/here/orthostate.toml");
        let config = RuntimeConfig::load_with(Some(path), env(&[])).unwrap();

        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_invalid_environment_value() {
        let error = RuntimeConfig::load_with(None, env(&[(IDLE_TIMEOUT_ENV, "soon")])).unwrap_err();

        assert!(matches!(error, ConfigError::InvalidEnvVar { name: IDLE_TIMEOUT_ENV, .. }));
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let error = RuntimeConfig::load_with(None, env(&[(LOOP_RATE_ENV, "0")])).unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(_)));

        let error = RuntimeConfig::from_toml_str("[scheduler]\nidle_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(_)));
    }
}
