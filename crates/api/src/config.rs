//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use messaging::ConsumerConfig;
use saga::SagaConfig;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid value {value:?} for {key}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `json` or `plain`
/// - `DATABASE_URL`: PostgreSQL event store; in-memory when unset
/// - `CHANNEL_PARTITIONS`, `MAX_DELIVERY_ATTEMPTS`: event channel
/// - `SWEEP_INTERVAL_SECS`, `PUBLISH_TIMEOUT_SECS`, `SAGA_TIMEOUT_SECS`,
///   `PROCESSING_TIMEOUT_SECS`, `GATEWAY_TIMEOUT_MS`: saga timing
/// - `CATALOG_PATH`: JSON object of product id to price in cents
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub channel_partitions: u32,
    pub sweep_interval: Duration,
    pub catalog_path: Option<PathBuf>,
    pub saga: SagaConfig,
    pub consumer: ConsumerConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let log_format = match non_empty("LOG_FORMAT").as_deref() {
            None | Some("plain") | Some("text") => LogFormat::Plain,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError {
                    key: "LOG_FORMAT",
                    value: other.to_string(),
                });
            }
        };

        let saga = SagaConfig {
            publish_timeout: secs(&lookup, "PUBLISH_TIMEOUT_SECS", defaults.saga.publish_timeout)?,
            saga_timeout: secs(&lookup, "SAGA_TIMEOUT_SECS", defaults.saga.saga_timeout)?,
            processing_timeout: secs(
                &lookup,
                "PROCESSING_TIMEOUT_SECS",
                defaults.saga.processing_timeout,
            )?,
            gateway_timeout: Duration::from_millis(parsed(
                &lookup,
                "GATEWAY_TIMEOUT_MS",
                defaults.saga.gateway_timeout.as_millis() as u64,
            )?),
            ..defaults.saga
        };

        let consumer = ConsumerConfig {
            max_delivery_attempts: parsed(
                &lookup,
                "MAX_DELIVERY_ATTEMPTS",
                defaults.consumer.max_delivery_attempts,
            )?,
            ..defaults.consumer
        };

        Ok(Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "PORT", defaults.port)?,
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            database_url: non_empty("DATABASE_URL"),
            channel_partitions: parsed(&lookup, "CHANNEL_PARTITIONS", defaults.channel_partitions)?
                .max(1),
            sweep_interval: secs(&lookup, "SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            catalog_path: non_empty("CATALOG_PATH").map(PathBuf::from),
            saga,
            consumer,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Plain,
            database_url: None,
            channel_partitions: 4,
            sweep_interval: Duration::from_secs(10),
            catalog_path: None,
            saga: SagaConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

fn parsed<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError { key, value }),
        _ => Ok(default),
    }
}

fn secs<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parsed(lookup, key, default.as_secs()).map(Duration::from_secs)
}
