use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

mod error;

use crate::locker::RetryPolicy;
pub use error::Error;

#[derive(Clone, Debug, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub enum StoreConfig {
    #[default]
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "sql")]
    Sql(SqlStoreConfig),
    #[serde(rename = "redis")]
    Redis(RedisStoreConfig),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SqlStoreConfig {
    pub url: String,
    #[serde(default = "SqlStoreConfig::default_table")]
    pub table: String,
    #[serde(default = "SqlStoreConfig::default_reclaim_interval")]
    pub reclaim_interval: u64, // seconds
}

impl SqlStoreConfig {
    fn default_table() -> String {
        "distributed_locks".to_string()
    }

    fn default_reclaim_interval() -> u64 {
        60
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RedisStoreConfig {
    pub url: String,
    #[serde(default = "RedisStoreConfig::default_key_prefix")]
    pub key_prefix: String,
}

impl RedisStoreConfig {
    fn default_key_prefix() -> String {
        "lock:".to_string()
    }
}

/// Defaults applied to the lock handles created by the CLI
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LockConfig {
    #[serde(default = "LockConfig::default_lease")]
    pub lease: u64, // milliseconds
    #[serde(default = "LockConfig::default_attempts")]
    pub attempts: u32,
    #[serde(default = "LockConfig::default_attempt_interval")]
    pub attempt_interval: u64, // milliseconds
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            lease: LockConfig::default_lease(),
            attempts: LockConfig::default_attempts(),
            attempt_interval: LockConfig::default_attempt_interval(),
        }
    }
}

impl LockConfig {
    fn default_lease() -> u64 {
        30_000
    }

    fn default_attempts() -> u32 {
        10
    }

    fn default_attempt_interval() -> u64 {
        100
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_millis(self.attempt_interval))
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TracingConfig {
    pub endpoint: String,
    pub sampling_rate: f64,
}

impl Configuration {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let config_str = fs::read_to_string(path)?;
        Self::load_from_str(&config_str)
    }

    pub fn load_from_str(slice: &str) -> Result<Self, Error> {
        let config: Configuration = toml::from_str(slice).map_err(|e| {
            println!("Configuration file format error:");
            println!("{e}");
            Error::ConfigurationFileFormat(e.to_string())
        })?;

        if let StoreConfig::Sql(sql) = &config.store {
            if sql.reclaim_interval == 0 {
                return Err(Error::InvalidValue(
                    "store.sql.reclaim_interval must be greater than zero".to_string(),
                ));
            }
        }

        if config.lock.lease == 0 {
            return Err(Error::InvalidValue(
                "lock.lease must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }
}
