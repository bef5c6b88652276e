//! Configuration models for environments and retry policies.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, RiggingError};

/// Bounded retry policy shared by readiness probes and metric waits.
///
/// Delays grow from `min` towards `max`; after `max_retries` attempts the
/// wait gives up. A zero retry ceiling is rejected so waits always end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Smallest delay between two attempts.
    pub min: Duration,
    /// Largest delay between two attempts.
    pub max: Duration,
    /// Maximum number of attempts.
    pub max_retries: u32,
}

impl BackoffConfig {
    /// Creates a validated backoff policy.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_retries` is zero or `min` exceeds `max`.
    pub fn new(min: Duration, max: Duration, max_retries: u32) -> Result<Self> {
        let config = Self {
            min,
            max,
            max_retries,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that the delays are ordered and the retry ceiling is non-zero.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_retries` is zero or `min` exceeds `max`.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(RiggingError::config("backoff max_retries must be at least 1"));
        }
        if self.min > self.max {
            return Err(RiggingError::config(format!(
                "backoff min delay {:?} exceeds max delay {:?}",
                self.min, self.max
            )));
        }
        Ok(())
    }

    /// Default policy for readiness probes.
    #[must_use]
    pub const fn readiness() -> Self {
        Self {
            min: constants::READY_BACKOFF_MIN,
            max: constants::READY_BACKOFF_MAX,
            max_retries: constants::READY_BACKOFF_RETRIES,
        }
    }

    /// Default policy for metric waits.
    #[must_use]
    pub const fn metrics() -> Self {
        Self {
            min: constants::METRICS_BACKOFF_MIN,
            max: constants::METRICS_BACKOFF_MAX,
            max_retries: constants::METRICS_BACKOFF_RETRIES,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::readiness()
    }
}

/// Configuration of a single environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Scope name, used as network name or cluster name.
    pub name: String,
    /// Base directory under which the shared directory is created.
    /// Falls back to the system temp directory.
    pub base_dir: Option<PathBuf>,
    /// Keep the shared directory after `close` for post-mortem inspection.
    pub keep_dir: bool,
    /// Log workload output at `info` instead of `debug`.
    pub verbose: bool,
    /// Readiness backoff used when start options carry none.
    pub ready_backoff: BackoffConfig,
    /// Host address used to build docker external endpoints.
    pub docker_host_address: String,
    /// Node image passed to `kind create cluster`, if any.
    pub kind_node_image: Option<String>,
}

impl EnvironmentConfig {
    /// Creates a configuration with defaults for the given scope name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_dir: None,
            keep_dir: false,
            verbose: false,
            ready_backoff: BackoffConfig::readiness(),
            docker_host_address: constants::DEFAULT_DOCKER_HOST_ADDRESS.to_string(),
            kind_node_image: None,
        }
    }

    /// Creates a configuration for `name` and applies the `RIGGING_*`
    /// environment variable overrides.
    #[must_use]
    pub fn from_env(name: impl Into<String>) -> Self {
        let mut config = Self::new(name);
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Applies overrides looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(constants::TMP_DIR_ENV).filter(|v| !v.is_empty()) {
            self.base_dir = Some(PathBuf::from(dir));
        }
        if let Some(flag) = lookup(constants::KEEP_DIR_ENV) {
            self.keep_dir = parse_flag(&flag);
        }
        if let Some(flag) = lookup(constants::VERBOSE_ENV) {
            self.verbose = parse_flag(&flag);
        }
        if let Some(host) = lookup(constants::DOCKER_HOST_ADDRESS_ENV).filter(|v| !v.is_empty()) {
            self.docker_host_address = host;
        }
    }

    /// Returns the base directory, defaulting to the system temp directory.
    #[must_use]
    pub fn resolved_base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn zero_retries_rejected() {
        let err = BackoffConfig::new(Duration::from_millis(1), Duration::from_millis(2), 0);
        assert!(err.is_err());
    }

    #[test]
    fn min_above_max_rejected() {
        let err = BackoffConfig::new(Duration::from_secs(2), Duration::from_secs(1), 3);
        assert!(err.is_err());
    }

    #[test]
    fn defaults_are_valid() {
        BackoffConfig::readiness().validate().expect("readiness");
        BackoffConfig::metrics().validate().expect("metrics");
    }

    #[test]
    fn env_overrides_applied() {
        let vars: HashMap<&str, &str> = [
            (constants::TMP_DIR_ENV, "/scratch"),
            (constants::KEEP_DIR_ENV, "true"),
            (constants::VERBOSE_ENV, "1"),
            (constants::DOCKER_HOST_ADDRESS_ENV, "10.0.0.5"),
        ]
        .into_iter()
        .collect();

        let mut config = EnvironmentConfig::new("e2e");
        config.apply_env(|key| vars.get(key).map(ToString::to_string));

        assert_eq!(config.resolved_base_dir(), PathBuf::from("/scratch"));
        assert!(config.keep_dir);
        assert!(config.verbose);
        assert_eq!(config.docker_host_address, "10.0.0.5");
    }

    #[test]
    fn base_dir_defaults_to_temp_dir() {
        let config = EnvironmentConfig::new("e2e");
        assert_eq!(config.resolved_base_dir(), std::env::temp_dir());
    }

    #[test]
    fn config_serializes() {
        let config = EnvironmentConfig::new("e2e");
        let json = serde_json::to_string(&config).expect("serialize");
        let back: EnvironmentConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.name, "e2e");
        assert_eq!(back.ready_backoff, BackoffConfig::readiness());
    }
}
