//! Worker configuration loaded from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use channel::PostgresChannelOptions;
use reservation::RetryPolicy;

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}', expected pretty or json")),
        }
    }
}

/// Worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL` (required), `DATABASE_MAX_CONNECTIONS` (default: `10`)
/// - `WORKER_CONCURRENCY` (default: `4`)
/// - `RESERVATION_MAX_RETRIES` (default: `3`)
/// - `RESERVATION_RETRY_BACKOFF_MS` (default: `500`),
///   `RESERVATION_RETRY_BACKOFF_MAX_MS` (default: `30000`)
/// - `QUEUE_POLL_INTERVAL_MS` (default: `250`),
///   `QUEUE_VISIBILITY_TIMEOUT_SECS` (default: `60`)
/// - `SWEEP_INTERVAL_SECS` (default: `60`, `0` disables the sweep),
///   `SWEEP_STALE_AFTER_SECS` (default: `300`)
/// - `METRICS_ADDR` (default: `"0.0.0.0:9000"`)
/// - `RUST_LOG` (default: `"info"`), `LOG_FORMAT` (default: `"pretty"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub worker_concurrency: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub retry_backoff_max: Duration,
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
    pub sweep_interval: Duration,
    pub sweep_stale_after: Duration,
    pub metrics_addr: SocketAddr,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which returns the raw value of
    /// a variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Env { lookup };

        Ok(Self {
            database_url: env
                .string("DATABASE_URL")
                .ok_or(ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env
                .parse("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(defaults.database_max_connections),
            worker_concurrency: env
                .parse("WORKER_CONCURRENCY")?
                .unwrap_or(defaults.worker_concurrency),
            max_retries: env
                .parse("RESERVATION_MAX_RETRIES")?
                .unwrap_or(defaults.max_retries),
            retry_backoff: env
                .parse("RESERVATION_RETRY_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            retry_backoff_max: env
                .parse("RESERVATION_RETRY_BACKOFF_MAX_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff_max),
            poll_interval: env
                .parse("QUEUE_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            visibility_timeout: env
                .parse("QUEUE_VISIBILITY_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
            sweep_interval: env
                .parse("SWEEP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            sweep_stale_after: env
                .parse("SWEEP_STALE_AFTER_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_stale_after),
            metrics_addr: env.parse("METRICS_ADDR")?.unwrap_or(defaults.metrics_addr),
            log_level: env.string("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: env.parse("LOG_FORMAT")?.unwrap_or(defaults.log_format),
        })
    }

    /// Returns the retry policy described by this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_backoff, self.retry_backoff_max)
    }

    /// Returns the queue polling options described by this configuration.
    pub fn channel_options(&self) -> PostgresChannelOptions {
        PostgresChannelOptions {
            poll_interval: self.poll_interval,
            visibility_timeout: self.visibility_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            database_max_connections: 10,
            worker_concurrency: 4,
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            retry_backoff_max: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            visibility_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
            sweep_stale_after: Duration::from_secs(300),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Blank values count as unset.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|value| {
                value.parse::<T>().map_err(|e| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_apply_when_unset() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/orders")]).unwrap();

        assert_eq!(config.database_url, "postgres://localhost/orders");
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff, Duration::from_millis(500));
        assert_eq!(config.retry_backoff_max, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.visibility_timeout, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.sweep_stale_after, Duration::from_secs(300));
        assert_eq!(config.metrics_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/orders"),
            ("WORKER_CONCURRENCY", "16"),
            ("RESERVATION_MAX_RETRIES", "5"),
            ("RESERVATION_RETRY_BACKOFF_MS", "100"),
            ("SWEEP_INTERVAL_SECS", "0"),
            ("METRICS_ADDR", "127.0.0.1:9100"),
            ("RUST_LOG", "reservation=debug"),
            ("LOG_FORMAT", "JSON"),
        ])
        .unwrap();

        assert_eq!(config.worker_concurrency, 16);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_backoff, Duration::from_millis(100));
        assert!(config.sweep_interval.is_zero());
        assert_eq!(config.metrics_addr.port(), 9100);
        assert_eq!(config.log_level, "reservation=debug");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_missing_database_url_is_an_error() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));

        let err = load(&[("DATABASE_URL", "   ")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let err = load(&[
            ("DATABASE_URL", "postgres://db/orders"),
            ("WORKER_CONCURRENCY", "lots"),
        ])
        .unwrap_err();

        match err {
            ConfigError::Invalid { key, value, .. } => {
                assert_eq!(key, "WORKER_CONCURRENCY");
                assert_eq!(value, "lots");
            }
            other => panic!("expected invalid value error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_log_format_is_an_error() {
        let err = load(&[
            ("DATABASE_URL", "postgres://db/orders"),
            ("LOG_FORMAT", "xml"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("LOG_FORMAT"));
    }

    #[test]
    fn test_derived_settings() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/orders"),
            ("RESERVATION_MAX_RETRIES", "2"),
            ("QUEUE_VISIBILITY_TIMEOUT_SECS", "30"),
        ])
        .unwrap();

        let policy = config.retry_policy();
        assert!(!policy.is_exhausted(1));
        assert!(policy.is_exhausted(2));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));

        let options = config.channel_options();
        assert_eq!(options.visibility_timeout, Duration::from_secs(30));
        assert_eq!(options.poll_interval, Duration::from_millis(250));
    }
}
