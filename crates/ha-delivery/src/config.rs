// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delivery configuration
//!
//! [`EngineConfig`] tunes the engine itself and is built in code.
//! [`DeliveryConfig`] is the TOML file read by the `ha-delivery` binary:
//!
//! ```toml
//! log_level = "info"
//!
//! [influxdb]
//! url = "http://localhost:8086"
//! org = "home"
//! bucket = "measurements"
//! token = "secret"
//! precision = "ns"
//! timeout_ms = 30000
//!
//! [engine]
//! flush_delay_ms = 2000
//! batch_size = 50
//! max_concurrent_workers = 2
//! health_interval_secs = 30
//!
//! [overflow]
//! path = "overflow.db"
//! ```
//!
//! `INFLUX_URL`, `INFLUX_ORG`, `INFLUX_BUCKET` and `INFLUX_TOKEN` override
//! the file.

use ha_measurement::TimeResolution;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Engine tuning
// ============================================================================

/// Engine tuning parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Debounce before a flush worker drains the queue
    pub flush_delay: Duration,

    /// Maximum measurements per batch write
    pub batch_size: usize,

    /// Upper bound on concurrently running flush workers
    pub max_concurrent_workers: usize,

    /// Period of the sink health probe
    pub health_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_delay: Duration::from_millis(2000),
            batch_size: 50,
            max_concurrent_workers: 2,
            health_interval: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Create a new config builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.max_concurrent_workers == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_workers must be at least 1".into(),
            ));
        }
        if self.health_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "health_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    flush_delay: Option<Duration>,
    batch_size: Option<usize>,
    max_concurrent_workers: Option<usize>,
    health_interval: Option<Duration>,
}

impl EngineConfigBuilder {
    /// Set the flush debounce delay
    pub fn flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = Some(delay);
        self
    }

    /// Set the maximum batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set the concurrent flush worker limit
    pub fn max_concurrent_workers(mut self, workers: usize) -> Self {
        self.max_concurrent_workers = Some(workers);
        self
    }

    /// Set the health probe period
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = Some(interval);
        self
    }

    /// Build the configuration
    pub fn build(self) -> EngineConfig {
        let defaults = EngineConfig::default();

        EngineConfig {
            flush_delay: self.flush_delay.unwrap_or(defaults.flush_delay),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            max_concurrent_workers: self
                .max_concurrent_workers
                .unwrap_or(defaults.max_concurrent_workers),
            health_interval: self.health_interval.unwrap_or(defaults.health_interval),
        }
    }
}

// ============================================================================
// File configuration
// ============================================================================

/// Top-level file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Default tracing filter directive (`RUST_LOG` wins when set).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub influxdb: InfluxSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub overflow: OverflowSettings,
}

/// InfluxDB v2 connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxSettings {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_org")]
    pub org: String,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// API token. No default.
    #[serde(default)]
    pub token: String,

    /// Timestamp precision of written lines.
    #[serde(default)]
    pub precision: TimeResolution,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Engine section of the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_flush_delay_ms")]
    pub flush_delay_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_workers")]
    pub max_concurrent_workers: usize,

    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
}

/// Overflow store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverflowSettings {
    #[serde(default = "default_overflow_path")]
    pub path: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_org() -> String {
    "home".to_string()
}

fn default_bucket() -> String {
    "measurements".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_flush_delay_ms() -> u64 {
    2000
}

fn default_batch_size() -> usize {
    50
}

fn default_max_workers() -> usize {
    2
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_overflow_path() -> String {
    "overflow.db".to_string()
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            influxdb: InfluxSettings::default(),
            engine: EngineSettings::default(),
            overflow: OverflowSettings::default(),
        }
    }
}

impl Default for InfluxSettings {
    fn default() -> Self {
        Self {
            url: default_url(),
            org: default_org(),
            bucket: default_bucket(),
            token: String::new(),
            precision: TimeResolution::default(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            flush_delay_ms: default_flush_delay_ms(),
            batch_size: default_batch_size(),
            max_concurrent_workers: default_max_workers(),
            health_interval_secs: default_health_interval_secs(),
        }
    }
}

impl Default for OverflowSettings {
    fn default() -> Self {
        Self {
            path: default_overflow_path(),
        }
    }
}

impl InfluxSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("url", &self.url),
            ("org", &self.org),
            ("bucket", &self.bucket),
            ("token", &self.token),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("influxdb.{} is empty", name)));
            }
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "influxdb.timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl EngineSettings {
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig::builder()
            .flush_delay(Duration::from_millis(self.flush_delay_ms))
            .batch_size(self.batch_size)
            .max_concurrent_workers(self.max_concurrent_workers)
            .health_interval(Duration::from_secs(self.health_interval_secs))
            .build()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.to_engine_config().validate()
    }
}

impl DeliveryConfig {
    /// Load, apply environment overrides and validate.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(Some(path.as_ref()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file (or defaults when `path` is `None`) and apply
    /// environment overrides, without validating.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `INFLUX_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `INFLUX_*` overrides from `lookup`. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let targets = [
            ("INFLUX_URL", &mut self.influxdb.url),
            ("INFLUX_ORG", &mut self.influxdb.org),
            ("INFLUX_BUCKET", &mut self.influxdb.bucket),
            ("INFLUX_TOKEN", &mut self.influxdb.token),
        ];
        for (key, target) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *target = value;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.influxdb.validate()?;
        self.engine.validate()?;
        if self.overflow.path.trim().is_empty() {
            return Err(ConfigError::Invalid("overflow.path is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfig::builder()
            .flush_delay(Duration::from_millis(100))
            .batch_size(10)
            .build();

        assert_eq!(config.flush_delay, Duration::from_millis(100));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_concurrent_workers, 2);
        assert_eq!(config.health_interval, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_config_rejects_zero_limits() {
        assert!(EngineConfig::builder().batch_size(0).build().validate().is_err());
        assert!(EngineConfig::builder()
            .max_concurrent_workers(0)
            .build()
            .validate()
            .is_err());
        assert!(EngineConfig::builder()
            .health_interval(Duration::ZERO)
            .build()
            .validate()
            .is_err());
    }

    #[test]
    fn test_parse_full_file() {
        let toml = r#"
log_level = "debug"

[influxdb]
url = "http://influx:8086"
org = "lab"
bucket = "power"
token = "secret"
precision = "s"
timeout_ms = 5000

[engine]
flush_delay_ms = 500
batch_size = 20
max_concurrent_workers = 4
health_interval_secs = 10

[overflow]
path = "/var/lib/ha/overflow.db"
"#;
        let config = DeliveryConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.influxdb.precision, TimeResolution::Seconds);
        assert_eq!(config.influxdb.timeout(), Duration::from_secs(5));
        assert_eq!(config.engine.to_engine_config().max_concurrent_workers, 4);
        assert_eq!(config.overflow.path, "/var/lib/ha/overflow.db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_for_missing_sections() {
        let config = DeliveryConfig::from_toml_str("[influxdb]\ntoken = \"t\"\n").unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.influxdb.url, "http://localhost:8086");
        assert_eq!(config.influxdb.precision, TimeResolution::Nanos);
        assert_eq!(config.engine.to_engine_config(), EngineConfig::default());
        assert_eq!(config.overflow.path, "overflow.db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_token_is_invalid() {
        let config = DeliveryConfig::from_toml_str("").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("token"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = DeliveryConfig::from_toml_str("[influxdb]\norg = \"file\"\n").unwrap();
        config.apply_overrides(|key| match key {
            "INFLUX_ORG" => Some("env".to_string()),
            "INFLUX_TOKEN" => Some("from-env".to_string()),
            "INFLUX_BUCKET" => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.influxdb.org, "env");
        assert_eq!(config.influxdb.token, "from-env");
        assert_eq!(config.influxdb.bucket, "measurements");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[influxdb]\ntoken = \"abc\"\n[engine]\nbatch_size = 0").unwrap();

        let err = DeliveryConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_precision_is_parse_error() {
        let err = DeliveryConfig::from_toml_str("[influxdb]\nprecision = \"minutes\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
