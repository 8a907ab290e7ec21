//! Process configuration read from the environment.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use carebase_core::config::{RetentionConfig, WorkerConfig};
use carebase_core::error::ConfigError;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Everything the `carebase-api` binary needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `PostgreSQL` connection string.
    pub database_url: String,
    /// Upper bound of the connection pool.
    pub database_max_connections: u32,
    /// Redis connection string for the broker.
    pub redis_url: String,
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Delivery worker knobs.
    pub worker: WorkerConfig,
    /// Retention of delivered outbox rows.
    pub outbox_retention: RetentionConfig,
    /// Retention of audit log entries.
    pub audit_retention: RetentionConfig,
    /// OTLP collector endpoint; export is disabled when unset.
    pub otlp_endpoint: Option<String>,
}

impl AppConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing, unparsable,
    /// or out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing, unparsable,
    /// or out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let worker = WorkerConfig {
            batch_size: required(&lookup, "OUTBOX_BATCH_SIZE")?,
            poll_interval: Duration::from_millis(required(&lookup, "OUTBOX_POLL_INTERVAL_MS")?),
            retry_attempts: required(&lookup, "OUTBOX_RETRY_ATTEMPTS")?,
            retry_delay: Duration::from_millis(required(&lookup, "OUTBOX_RETRY_DELAY_MS")?),
        };
        worker.validate()?;

        let outbox_retention = RetentionConfig {
            interval: Duration::from_secs(required(&lookup, "OUTBOX_CLEANUP_INTERVAL_SECS")?),
            retention_days: required(&lookup, "OUTBOX_RETENTION_DAYS")?,
        };
        outbox_retention.validate()?;

        let audit_retention = RetentionConfig {
            interval: Duration::from_secs(required(&lookup, "AUDIT_CLEANUP_INTERVAL_SECS")?),
            retention_days: required(&lookup, "AUDIT_RETENTION_DAYS")?,
        };
        audit_retention.validate()?;

        Ok(Self {
            database_url: required(&lookup, "DATABASE_URL")?,
            database_max_connections: optional(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_MAX_CONNECTIONS,
            )?,
            redis_url: required(&lookup, "REDIS_URL")?,
            host: lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: optional(&lookup, "PORT", DEFAULT_PORT)?,
            worker,
            outbox_retention,
            audit_retention,
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.trim().is_empty()),
        })
    }
}

fn required<F, T>(lookup: &F, key: &'static str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(key).ok_or(ConfigError::Missing(key))?;
    parse(key, &raw)
}

fn optional<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => parse(key, &raw),
        None => Ok(default),
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: format!("must be a valid number: {e}"),
    })
}
