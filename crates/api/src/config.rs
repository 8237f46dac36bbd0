//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use broker::RetryPolicy;
use inventory::{EngineConfig, LockingStrategy};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// A configuration value that is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Server and service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `DATABASE_URL`: PostgreSQL stores when set, in-memory otherwise
/// - `AMQP_URL`: RabbitMQ bus when set (needs the `amqp` feature)
/// - `REDIS_URL`: advisory lock around reservations (needs the `redis` feature)
/// - `STOCK_LOCKING_STRATEGY`: `pessimistic` or `optimistic`
/// - `STOCK_OPTIMISTIC_MAX_ATTEMPTS`, `BROKER_MAX_RETRY`, `BROKER_RETRY_BASE_DELAY_MS`
/// - `KITCHEN_COOK_MS`: simulated cooking time
/// - `PAYMENT_SUCCESS_URL`: where the client is redirected after ordering
/// - `PAYMENT_WEBHOOK_SECRET`: signing secret of the payment webhook; every
///   notification is rejected while it is unset
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub amqp_url: Option<String>,
    pub redis_url: Option<String>,
    pub locking_strategy: LockingStrategy,
    pub optimistic_max_attempts: u32,
    pub max_retry: i64,
    pub retry_base_delay: Duration,
    pub cook_time: Duration,
    pub payment_success_url: String,
    pub webhook_secret: Option<Secret>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which returns the raw value of a variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse(&var, "PORT")?.unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse(&var, "LOG_FORMAT")?.unwrap_or(defaults.log_format),
            database_url: var("DATABASE_URL"),
            amqp_url: var("AMQP_URL"),
            redis_url: var("REDIS_URL"),
            locking_strategy: parse(&var, "STOCK_LOCKING_STRATEGY")?
                .unwrap_or(defaults.locking_strategy),
            optimistic_max_attempts: parse(&var, "STOCK_OPTIMISTIC_MAX_ATTEMPTS")?
                .unwrap_or(defaults.optimistic_max_attempts),
            max_retry: parse(&var, "BROKER_MAX_RETRY")?.unwrap_or(defaults.max_retry),
            retry_base_delay: parse(&var, "BROKER_RETRY_BASE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            cook_time: parse(&var, "KITCHEN_COOK_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.cook_time),
            payment_success_url: var("PAYMENT_SUCCESS_URL").unwrap_or(defaults.payment_success_url),
            webhook_secret: var("PAYMENT_WEBHOOK_SECRET").map(Secret),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            strategy: self.locking_strategy,
            optimistic_max_attempts: self.optimistic_max_attempts,
            ..EngineConfig::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retry: self.max_retry,
            base_delay: self.retry_base_delay,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            amqp_url: None,
            redis_url: None,
            locking_strategy: LockingStrategy::Pessimistic,
            optimistic_max_attempts: 3,
            max_retry: 3,
            retry_base_delay: Duration::from_millis(1000),
            cook_time: Duration::from_millis(5000),
            payment_success_url: "http://localhost:8282/success".to_string(),
            webhook_secret: None,
        }
    }
}

fn parse<T, F>(var: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value })
        })
        .transpose()
}
