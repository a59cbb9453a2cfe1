//! Configuration management
//!
//! Configuration is layered with figment, later sources overriding earlier
//! ones:
//!
//! 1. Built-in defaults
//! 2. A TOML file: `./couponq.toml`, or the path given to [`CouponqConfig::load_from`]
//! 3. Environment variables prefixed with `COUPONQ_`, with `__` separating
//!    sections from keys (`COUPONQ_WORKER__CONCURRENCY=4`)
//!
//! # Example file
//!
//! ```toml
//! [redis]
//! url = "redis://localhost:6379"
//! pool_size = 16
//! namespace = "staging"
//!
//! [queues]
//! classes = ["email", "sms", "cashback"]
//!
//! [worker]
//! concurrency = 4
//! poll_timeout_ms = 2000
//! handler_timeout_secs = 300
//! lease_secs = 600
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use crate::jobs::{JobClass, WorkerOptions};
use crate::keys::Keyspace;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File read by [`CouponqConfig::load`] when present.
pub const DEFAULT_CONFIG_FILE: &str = "couponq.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "COUPONQ_";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Sources could not be merged or extracted.
    #[error("failed to load configuration: {0}")]
    Load(Box<figment::Error>),

    /// An explicitly requested file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Values were loaded but are inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// Redis connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    /// Connection URL.
    pub url: String,
    /// Maximum pooled connections. Each busy worker holds one during a poll.
    pub pool_size: usize,
    /// Optional prefix for every key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 16,
            namespace: None,
        }
    }
}

/// Which job classes are enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Enabled classes, in round-robin order.
    pub classes: Vec<JobClass>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            classes: JobClass::ALL.to_vec(),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Worker tasks per process.
    pub concurrency: usize,
    /// Longest a single queue poll blocks.
    pub poll_timeout_ms: u64,
    /// Pause after a store error.
    pub retry_delay_ms: u64,
    /// Longest a handler may run.
    pub handler_timeout_secs: u64,
    /// Lease length; must exceed the handler timeout.
    pub lease_secs: u64,
    /// Interval between lease reaper runs.
    pub reap_interval_secs: u64,
    /// Attempts after which failures are logged as exhausted.
    pub max_attempts: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_timeout_ms: 2000,
            retry_delay_ms: 1000,
            handler_timeout_secs: 300,
            lease_secs: 600,
            reap_interval_secs: 30,
            max_attempts: 3,
        }
    }
}

impl WorkerSettings {
    /// Settings as worker options.
    #[must_use]
    pub const fn options(&self) -> WorkerOptions {
        WorkerOptions {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            handler_timeout: Duration::from_secs(self.handler_timeout_secs),
            lease_ttl: Duration::from_secs(self.lease_secs),
            reap_interval: Duration::from_secs(self.reap_interval_secs),
            max_attempts: self.max_attempts,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty in debug builds, JSON in release builds.
    #[default]
    Auto,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line human-readable output.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "info".to_string()
            },
            format: LogFormat::Auto,
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponqConfig {
    /// Redis connection.
    #[serde(default)]
    pub redis: RedisSettings,
    /// Enabled classes.
    #[serde(default)]
    pub queues: QueueSettings,
    /// Worker pool.
    #[serde(default)]
    pub worker: WorkerSettings,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl CouponqConfig {
    /// Load from defaults, `./couponq.toml` if present, and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source is malformed or validation fails.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use couponq::config::CouponqConfig;
    ///
    /// # fn example() -> anyhow::Result<()> {
    /// let config = CouponqConfig::load()?;
    /// println!("polling {:?}", config.queues.classes);
    /// # Ok(())
    /// # }
    /// ```
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(Path::new(DEFAULT_CONFIG_FILE)))
    }

    /// Load from defaults, the file at `path`, and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if `path` does not exist, or an
    /// error if a source is malformed or validation fails.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::from_figment(Self::figment(path))
    }

    /// The layered sources, before extraction.
    #[must_use]
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(true))
    }

    /// Extract and validate a configuration from `figment`.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let worker = &self.worker;
        if self.queues.classes.is_empty() {
            return Err(ConfigError::Invalid("queues.classes must not be empty".into()));
        }
        if worker.concurrency == 0 {
            return Err(ConfigError::Invalid("worker.concurrency must be at least 1".into()));
        }
        if worker.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "worker.poll_timeout_ms must be greater than 0".into(),
            ));
        }
        if worker.max_attempts == 0 {
            return Err(ConfigError::Invalid("worker.max_attempts must be at least 1".into()));
        }
        if worker.lease_secs <= worker.handler_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "worker.lease_secs ({}) must exceed worker.handler_timeout_secs ({})",
                worker.lease_secs, worker.handler_timeout_secs
            )));
        }
        if self.redis.pool_size == 0 {
            return Err(ConfigError::Invalid("redis.pool_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Key builder for the configured namespace.
    #[must_use]
    pub fn keyspace(&self) -> Keyspace {
        self.redis
            .namespace
            .as_deref()
            .map_or_else(Keyspace::root, Keyspace::namespaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_toml(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = CouponqConfig::default();
        assert_eq!(config.redis.url, "redis://localhost:6379");
        assert_eq!(config.queues.classes, JobClass::ALL.to_vec());
        assert_eq!(config.worker.max_attempts, 3);
        assert!(config.validate().is_ok());
        assert_eq!(config.keyspace(), Keyspace::root());
    }

    #[test]
    fn test_worker_options() {
        let options = WorkerSettings::default().options();
        assert_eq!(options.poll_timeout, Duration::from_secs(2));
        assert_eq!(options.lease_ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_load_from_toml_file() {
        let file = write_toml(
            r#"
[redis]
namespace = "staging"

[queues]
classes = ["sms", "email"]

[worker]
concurrency = 8
handler_timeout_secs = 30
lease_secs = 60
"#,
        );

        let config = CouponqConfig::load_from(file.path()).unwrap();
        assert_eq!(config.worker.concurrency, 8);
        assert_eq!(config.worker.poll_timeout_ms, 2000);
        assert_eq!(config.queues.classes, vec![JobClass::Sms, JobClass::Email]);
        assert_eq!(config.keyspace().namespace(), Some("staging"));
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = CouponqConfig::load_from("/nonexistent/couponq.toml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_unknown_class_is_rejected() {
        let file = write_toml("[queues]\nclasses = [\"fax\"]\n");
        assert!(matches!(
            CouponqConfig::load_from(file.path()),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml("[logging]\nlevel = \"warn\"\n");
        std::env::set_var("COUPONQ_LOGGING__LEVEL", "trace");
        let config = CouponqConfig::load_from(file.path());
        std::env::remove_var("COUPONQ_LOGGING__LEVEL");

        assert_eq!(config.unwrap().logging.level, "trace");
    }

    #[test]
    fn test_validation_rules() {
        let mut config = CouponqConfig::default();
        config.worker.lease_secs = config.worker.handler_timeout_secs;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = CouponqConfig::default();
        config.worker.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = CouponqConfig::default();
        config.worker.poll_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = CouponqConfig::default();
        config.worker.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = CouponqConfig::default();
        config.queues.classes.clear();
        assert!(config.validate().is_err());
    }
}
