// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process configuration, read from `UDPLOG_*` environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::clickhouse::{is_identifier, ClickHouseConfig};
use crate::constants::{
    BUFFER_SIZE, DEFAULT_CLICKHOUSE_TABLE, DEFAULT_CLICKHOUSE_TIMEOUT, DEFAULT_HOST, DEFAULT_PORT,
    DEFAULT_STATS_INTERVAL, MIN_BUFFER_SIZE, QUEUE_SLOTS_PER_WORKER,
};
use crate::converter::{CoercionPolicy, Converter, TimestampZone};
use crate::errors::ConfigError;
use crate::receiver::ReceiverConfig;
use crate::worker_pool::{default_worker_count, WorkerPoolConfig};

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub receiver: ReceiverConfig,
    pub pool: WorkerPoolConfig,
    pub converter: Converter,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// How often ingestion counters are logged; `None` disables it
    pub stats_interval: Option<Duration>,
    /// Rows are only logged when unset
    pub clickhouse: Option<ClickHouseConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            receiver: ReceiverConfig::default(),
            pool: WorkerPoolConfig::default(),
            converter: Converter::default(),
            log_level: "info".to_string(),
            stats_interval: Some(DEFAULT_STATS_INTERVAL),
            clickhouse: None,
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Unset and blank values
    /// take their defaults; set values that do not parse are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let worker_count = parse(&get, "UDPLOG_WORKERS")?.unwrap_or_else(default_worker_count);
        let queue_capacity = parse(&get, "UDPLOG_QUEUE_CAPACITY")?
            .unwrap_or_else(|| worker_count.saturating_mul(QUEUE_SLOTS_PER_WORKER));
        let task_timeout = parse::<u64, _>(&get, "UDPLOG_TASK_TIMEOUT_MS")?
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        let stats_interval = match parse::<u64, _>(&get, "UDPLOG_STATS_INTERVAL_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_STATS_INTERVAL),
        };

        let clickhouse = match get("UDPLOG_CLICKHOUSE_URL") {
            Some(url) => Some(ClickHouseConfig {
                url,
                table: get("UDPLOG_CLICKHOUSE_TABLE")
                    .unwrap_or_else(|| DEFAULT_CLICKHOUSE_TABLE.to_string()),
                database: get("UDPLOG_CLICKHOUSE_DATABASE"),
                user: get("UDPLOG_CLICKHOUSE_USER"),
                password: get("UDPLOG_CLICKHOUSE_PASSWORD"),
                timeout: parse::<u64, _>(&get, "UDPLOG_CLICKHOUSE_TIMEOUT_MS")?
                    .map_or(DEFAULT_CLICKHOUSE_TIMEOUT, Duration::from_millis),
            }),
            None => None,
        };

        let config = Self {
            receiver: ReceiverConfig {
                host: get("UDPLOG_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: parse(&get, "UDPLOG_PORT")?.unwrap_or(DEFAULT_PORT),
                buffer_size: parse(&get, "UDPLOG_BUFFER_SIZE")?.unwrap_or(BUFFER_SIZE),
            },
            pool: WorkerPoolConfig {
                worker_count,
                queue_capacity,
                task_timeout,
            },
            converter: Converter::new(
                parse::<CoercionPolicy, _>(&get, "UDPLOG_COERCION")?.unwrap_or_default(),
                parse::<TimestampZone, _>(&get, "UDPLOG_TIMEZONE")?.unwrap_or_default(),
            ),
            log_level: get("UDPLOG_LOG_LEVEL")
                .map(|level| level.to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
            stats_interval,
            clickhouse,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.receiver.port == 0 {
            return Err(ConfigError::Invalid(
                "UDPLOG_PORT must be greater than 0".to_string(),
            ));
        }
        if self.receiver.host.trim().is_empty() {
            return Err(ConfigError::Invalid("UDPLOG_HOST cannot be empty".to_string()));
        }
        if self.receiver.buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "UDPLOG_BUFFER_SIZE must be at least {MIN_BUFFER_SIZE} bytes"
            )));
        }
        if self.pool.worker_count == 0 {
            return Err(ConfigError::Invalid(
                "UDPLOG_WORKERS must be greater than 0".to_string(),
            ));
        }
        if self.pool.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "UDPLOG_QUEUE_CAPACITY must be greater than 0".to_string(),
            ));
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        if let Some(clickhouse) = &self.clickhouse {
            if !clickhouse.url.starts_with("http://") && !clickhouse.url.starts_with("https://") {
                return Err(ConfigError::Invalid(format!(
                    "UDPLOG_CLICKHOUSE_URL must be an http(s) URL, got '{}'",
                    clickhouse.url
                )));
            }
            if !is_identifier(&clickhouse.table) {
                return Err(ConfigError::Invalid(format!(
                    "Invalid ClickHouse table name '{}'",
                    clickhouse.table
                )));
            }
            if let Some(database) = &clickhouse.database {
                if !is_identifier(database) || database.contains('.') {
                    return Err(ConfigError::Invalid(format!(
                        "Invalid ClickHouse database name '{database}'"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(None),
    }
}
