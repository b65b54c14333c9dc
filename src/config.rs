//! Pool configuration.
//!
//! Sizing, retry defaults, status polling and memory sampling for the
//! worker pool. Values come from `Default`, builder methods, or the
//! `TASKPOOL_*` environment variables.

use std::time::Duration;

use thiserror::Error;

use crate::scheduler::task::DEFAULT_MAX_RETRIES;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Workers spawned when the pool starts.
    pub initial_worker_count: usize,
    /// Upper bound on live plus still-spawning workers.
    pub max_worker_count: usize,
    /// Retry budget for tasks submitted without an explicit one.
    pub default_max_retries: u32,
    /// Tick of `status_stream`.
    pub status_interval: Duration,
    /// Whether workers sample resident memory after each attempt.
    pub sample_memory: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_worker_count: 4,
            max_worker_count: 10,
            default_max_retries: DEFAULT_MAX_RETRIES,
            status_interval: Duration::from_secs(1),
            sample_memory: true,
        }
    }
}

impl PoolConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `TASKPOOL_INITIAL_WORKERS` | `initial_worker_count` |
    /// | `TASKPOOL_MAX_WORKERS` | `max_worker_count` |
    /// | `TASKPOOL_DEFAULT_MAX_RETRIES` | `default_max_retries` |
    /// | `TASKPOOL_STATUS_INTERVAL_MS` | `status_interval` |
    /// | `TASKPOOL_SAMPLE_MEMORY` | `sample_memory` |
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`PoolConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("TASKPOOL_INITIAL_WORKERS") {
            config.initial_worker_count = parse_env_value(&val, "TASKPOOL_INITIAL_WORKERS")?;
        }

        if let Some(val) = lookup("TASKPOOL_MAX_WORKERS") {
            config.max_worker_count = parse_env_value(&val, "TASKPOOL_MAX_WORKERS")?;
        }

        if let Some(val) = lookup("TASKPOOL_DEFAULT_MAX_RETRIES") {
            config.default_max_retries = parse_env_value(&val, "TASKPOOL_DEFAULT_MAX_RETRIES")?;
        }

        if let Some(val) = lookup("TASKPOOL_STATUS_INTERVAL_MS") {
            let millis: u64 = parse_env_value(&val, "TASKPOOL_STATUS_INTERVAL_MS")?;
            config.status_interval = Duration::from_millis(millis);
        }

        if let Some(val) = lookup("TASKPOOL_SAMPLE_MEMORY") {
            config.sample_memory = parse_env_bool(&val, "TASKPOOL_SAMPLE_MEMORY")?;
        }

        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_worker_count == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_worker_count must be greater than 0".to_string(),
            ));
        }

        if self.initial_worker_count > self.max_worker_count {
            return Err(ConfigError::ValidationFailed(format!(
                "initial_worker_count ({}) cannot exceed max_worker_count ({})",
                self.initial_worker_count, self.max_worker_count
            )));
        }

        if self.status_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "status_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the initial worker count.
    pub fn with_initial_workers(mut self, count: usize) -> Self {
        self.initial_worker_count = count;
        self
    }

    /// Builder method to set the maximum worker count.
    pub fn with_max_workers(mut self, count: usize) -> Self {
        self.max_worker_count = count;
        self
    }

    /// Builder method to set the default retry budget.
    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    /// Builder method to set the status stream interval.
    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    /// Builder method to enable or disable memory sampling.
    pub fn with_memory_sampling(mut self, enabled: bool) -> Self {
        self.sample_memory = enabled;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.initial_worker_count, 4);
        assert_eq!(config.max_worker_count, 10);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.status_interval, Duration::from_secs(1));
        assert!(config.sample_memory);
    }

    #[test]
    fn test_config_builder() {
        let config = PoolConfig::new()
            .with_initial_workers(2)
            .with_max_workers(6)
            .with_default_max_retries(1)
            .with_status_interval(Duration::from_millis(250))
            .with_memory_sampling(false);

        assert_eq!(config.initial_worker_count, 2);
        assert_eq!(config.max_worker_count, 6);
        assert_eq!(config.default_max_retries, 1);
        assert_eq!(config.status_interval, Duration::from_millis(250));
        assert!(!config.sample_memory);
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(PoolConfig::default().validate().is_ok());
        assert!(PoolConfig::default()
            .with_initial_workers(0)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validation_zero_max_workers() {
        let result = PoolConfig::default()
            .with_initial_workers(0)
            .with_max_workers(0)
            .validate();
        assert!(result.unwrap_err().to_string().contains("max_worker_count"));
    }

    #[test]
    fn test_validation_initial_exceeds_max() {
        let result = PoolConfig::default()
            .with_initial_workers(12)
            .with_max_workers(10)
            .validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("initial_worker_count"));
    }

    #[test]
    fn test_validation_zero_interval() {
        let result = PoolConfig::default()
            .with_status_interval(Duration::ZERO)
            .validate();
        assert!(result.unwrap_err().to_string().contains("status_interval"));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = PoolConfig::from_lookup(lookup_from(&[
            ("TASKPOOL_INITIAL_WORKERS", "1"),
            ("TASKPOOL_MAX_WORKERS", " 3 "),
            ("TASKPOOL_DEFAULT_MAX_RETRIES", "5"),
            ("TASKPOOL_STATUS_INTERVAL_MS", "200"),
            ("TASKPOOL_SAMPLE_MEMORY", "off"),
        ]))
        .expect("valid variables should parse");

        assert_eq!(config.initial_worker_count, 1);
        assert_eq!(config.max_worker_count, 3);
        assert_eq!(config.default_max_retries, 5);
        assert_eq!(config.status_interval, Duration::from_millis(200));
        assert!(!config.sample_memory);
    }

    #[test]
    fn test_from_lookup_empty_is_default() {
        let config = PoolConfig::from_lookup(|_| None).expect("defaults should load");
        assert_eq!(config.max_worker_count, 10);
    }

    #[test]
    fn test_from_lookup_invalid_number() {
        let err = PoolConfig::from_lookup(lookup_from(&[("TASKPOOL_MAX_WORKERS", "many")]))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("TASKPOOL_MAX_WORKERS"));
        assert!(message.contains("many"));
    }

    #[test]
    fn test_from_lookup_invalid_bool() {
        let err = PoolConfig::from_lookup(lookup_from(&[("TASKPOOL_SAMPLE_MEMORY", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("expected boolean"));
    }
}
