//! Configuration management for peerbus
//!
//! Configuration comes from defaults, an optional TOML file and `PEERBUS_*`
//! environment overrides, in that order, and is validated before use.

use crate::core_store::clone::{
    CloneOptions, DEFAULT_MUTATION_BUFFER_INTERVAL, DEFAULT_RESYNC_INTERVAL, DEFAULT_STALE_INTERVAL,
};
use crate::logging::{LogConfig, LogLevel};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Overrides the retry interval passed to every `peer()` call, in seconds
pub const CONNECT_RETRY_ENV: &str = "PEERBUS_DEFAULT_CONNECT_RETRY";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Manager configuration
    pub manager: ManagerConfig,

    /// Peering configuration
    pub peering: PeeringConfig,

    /// Log batching configuration
    pub log_buffer: LogBufferConfig,

    /// Data store configuration
    pub stores: StoresConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Use the wall clock; otherwise time only moves through `advance_time`
    pub use_real_time: bool,

    /// How long a store query may stay unanswered
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeeringConfig {
    /// Retry interval used when a caller does not pick one
    #[serde(with = "humantime_serde")]
    pub default_retry: Duration,

    /// Deployment-wide retry interval taking precedence over every caller
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub connect_retry_override: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogBufferConfig {
    /// Records sent per topic in one flush
    pub batch_size: usize,

    /// Prefix of the topic a log stream is published on
    pub topic_prefix: String,

    /// Per-stream cap on queued records; `None` is unbounded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_buffered_records: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoresConfig {
    /// Directory for sqlite backends opened without an explicit path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_dir: Option<PathBuf>,

    #[serde(with = "humantime_serde")]
    pub clone_resync_interval: Duration,

    /// Seconds of disconnection before a clone is stale; negative never
    pub clone_stale_interval: f64,

    /// Seconds of disconnection during which clone mutations are buffered;
    /// zero or negative drops them
    pub clone_mutation_buffer_interval: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            use_real_time: true,
            query_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for PeeringConfig {
    fn default() -> Self {
        Self {
            default_retry: Duration::from_secs(10),
            connect_retry_override: None,
        }
    }
}

impl Default for LogBufferConfig {
    fn default() -> Self {
        Self {
            batch_size: 400,
            topic_prefix: crate::core_wire::DEFAULT_LOG_TOPIC_PREFIX.to_string(),
            max_buffered_records: Some(100_000),
        }
    }
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            sqlite_dir: None,
            clone_resync_interval: Duration::from_secs_f64(DEFAULT_RESYNC_INTERVAL),
            clone_stale_interval: DEFAULT_STALE_INTERVAL,
            clone_mutation_buffer_interval: DEFAULT_MUTATION_BUFFER_INTERVAL,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl StoresConfig {
    /// Clone options used when a caller does not pass its own
    pub fn clone_options(&self) -> CloneOptions {
        CloneOptions::from_secs(
            self.clone_resync_interval.as_secs_f64(),
            self.clone_stale_interval,
            self.clone_mutation_buffer_interval,
        )
    }
}

impl LoggingConfig {
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig::new(self.level.parse().unwrap_or_default())
            .with_timestamp(self.with_timestamp)
            .with_target(self.with_target)
            .json_format(self.json_format)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| ConfigError::invalid(key, e))
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(value.trim())
        .map_err(|e| ConfigError::invalid(key, e))
}

/// Whole seconds, as accepted by the connect retry override
fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse(key, value)?;
    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Defaults plus environment overrides
    ///
    /// Environment variables follow the pattern PEERBUS_<KEY>, for example
    /// PEERBUS_LOG_BATCH_SIZE=100
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PEERBUS_*` overrides from `lookup` on top of this configuration
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        // Manager
        if let Some(v) = lookup("PEERBUS_USE_REAL_TIME") {
            self.manager.use_real_time = parse("PEERBUS_USE_REAL_TIME", &v)?;
        }
        if let Some(v) = lookup("PEERBUS_QUERY_TIMEOUT") {
            self.manager.query_timeout = parse_duration("PEERBUS_QUERY_TIMEOUT", &v)?;
        }

        // Peering
        if let Some(v) = lookup("PEERBUS_PEER_RETRY") {
            self.peering.default_retry = parse_duration("PEERBUS_PEER_RETRY", &v)?;
        }
        if let Some(v) = lookup(CONNECT_RETRY_ENV) {
            self.peering.connect_retry_override = Some(parse_secs(CONNECT_RETRY_ENV, &v)?);
        }

        // Log buffer
        if let Some(v) = lookup("PEERBUS_LOG_BATCH_SIZE") {
            self.log_buffer.batch_size = parse("PEERBUS_LOG_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("PEERBUS_LOG_TOPIC_PREFIX") {
            self.log_buffer.topic_prefix = v;
        }
        if let Some(v) = lookup("PEERBUS_LOG_MAX_BUFFERED") {
            // 0 lifts the cap
            let cap: usize = parse("PEERBUS_LOG_MAX_BUFFERED", &v)?;
            self.log_buffer.max_buffered_records = (cap > 0).then_some(cap);
        }

        // Stores
        if let Some(v) = lookup("PEERBUS_SQLITE_DIR") {
            self.stores.sqlite_dir = Some(PathBuf::from(v));
        }

        // Logging
        if let Some(v) = lookup("PEERBUS_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("PEERBUS_LOG_JSON") {
            self.logging.json_format = parse("PEERBUS_LOG_JSON", &v)?;
        }

        Ok(())
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manager.query_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "query_timeout must be greater than 0".to_string(),
            ));
        }

        if self.log_buffer.batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "log batch_size must be greater than 0".to_string(),
            ));
        }

        if let Some(cap) = self.log_buffer.max_buffered_records {
            if cap < self.log_buffer.batch_size {
                return Err(ConfigError::ValidationFailed(format!(
                    "max_buffered_records ({}) is smaller than batch_size ({})",
                    cap, self.log_buffer.batch_size
                )));
            }
        }

        if self.stores.clone_resync_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "clone_resync_interval must be greater than 0".to_string(),
            ));
        }

        if self.logging.level.parse::<LogLevel>().is_err() {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.log_buffer.batch_size, 400);
        assert_eq!(config.log_buffer.max_buffered_records, Some(100_000));
        assert_eq!(config.peering.connect_retry_override, None);
    }

    #[test]
    fn test_connect_retry_override() {
        let mut config = Config::default();
        config
            .apply_overrides(env_of(&[(CONNECT_RETRY_ENV, "3")]))
            .unwrap();
        assert_eq!(
            config.peering.connect_retry_override,
            Some(Duration::from_secs(3))
        );

        let err = config
            .apply_overrides(env_of(&[(CONNECT_RETRY_ENV, "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_log_buffer_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(env_of(&[
                ("PEERBUS_LOG_BATCH_SIZE", "10"),
                ("PEERBUS_LOG_MAX_BUFFERED", "0"),
                ("PEERBUS_QUERY_TIMEOUT", "250ms"),
            ]))
            .unwrap();
        assert_eq!(config.log_buffer.batch_size, 10);
        assert_eq!(config.log_buffer.max_buffered_records, None);
        assert_eq!(config.manager.query_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.log_buffer.batch_size = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.log_buffer.max_buffered_records = Some(10);
        assert!(config.validate().is_err());

        config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peerbus.toml");

        let mut config = Config::default();
        config.manager.use_real_time = false;
        config.stores.clone_stale_interval = -1.0;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert!(!loaded.manager.use_real_time);
        let options = loaded.stores.clone_options();
        assert_eq!(options.stale_interval, None);
        assert_eq!(options.mutation_buffer_interval, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [log_buffer]
            batch_size = 50

            [stores]
            clone_resync_interval = "2s"
            "#,
        )
        .unwrap();
        assert_eq!(config.log_buffer.batch_size, 50);
        assert_eq!(config.stores.clone_resync_interval, Duration::from_secs(2));
        assert_eq!(config.manager.query_timeout, Duration::from_secs(10));
        assert_eq!(config.stores.clone_stale_interval, 300.0);
    }
}
