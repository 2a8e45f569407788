//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use inventory::ConsumerConfig;
use messaging::RetryPolicy;

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `SERVICE_NAME` (default: `"inventory"`), prefixes the queue names
/// - `HOST` / `PORT` (default: `"0.0.0.0"` / `8083`)
/// - `DATABASE_URL`, PostgreSQL ledger; the in-memory ledger when unset
/// - `DATABASE_MAX_CONNECTIONS` (default: `10`)
/// - `KAFKA_BROKERS`, external broker; the in-process broker when unset
/// - `RPC_TIMEOUT_MS` (default: `5000`), deadline for RPCs without one
/// - `PUBLISH_MAX_ATTEMPTS` (default: `3`)
/// - `PUBLISH_INITIAL_BACKOFF_MS` / `PUBLISH_MAX_BACKOFF_MS` (default: `100` / `5000`)
/// - `PUBLISH_CONFIRM_TIMEOUT_MS` (default: `5000`)
/// - `MAX_REJECTION_REDELIVERIES` (default: `3`)
/// - `SEED_DEMO_DATA` (default: `false`)
/// - `RUST_LOG` (default: `"info"`) and `LOG_FORMAT` (`"json"` or plain text)
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub service_name: String,
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub kafka_brokers: Option<String>,
    pub rpc_timeout_ms: u64,
    pub publish_max_attempts: u32,
    pub publish_initial_backoff_ms: u64,
    pub publish_max_backoff_ms: u64,
    pub publish_confirm_timeout_ms: u64,
    pub max_rejection_redeliveries: u32,
    pub seed_demo_data: bool,
    pub log_level: String,
    pub json_logs: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`. Empty and unparseable values
    /// fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            service_name: var("SERVICE_NAME").unwrap_or(defaults.service_name),
            host: var("HOST").unwrap_or(defaults.host),
            port: parse(var("PORT")).unwrap_or(defaults.port),
            database_url: var("DATABASE_URL"),
            database_max_connections: parse(var("DATABASE_MAX_CONNECTIONS"))
                .unwrap_or(defaults.database_max_connections),
            kafka_brokers: var("KAFKA_BROKERS"),
            rpc_timeout_ms: parse(var("RPC_TIMEOUT_MS")).unwrap_or(defaults.rpc_timeout_ms),
            publish_max_attempts: parse(var("PUBLISH_MAX_ATTEMPTS"))
                .unwrap_or(defaults.publish_max_attempts),
            publish_initial_backoff_ms: parse(var("PUBLISH_INITIAL_BACKOFF_MS"))
                .unwrap_or(defaults.publish_initial_backoff_ms),
            publish_max_backoff_ms: parse(var("PUBLISH_MAX_BACKOFF_MS"))
                .unwrap_or(defaults.publish_max_backoff_ms),
            publish_confirm_timeout_ms: parse(var("PUBLISH_CONFIRM_TIMEOUT_MS"))
                .unwrap_or(defaults.publish_confirm_timeout_ms),
            max_rejection_redeliveries: parse(var("MAX_REJECTION_REDELIVERIES"))
                .unwrap_or(defaults.max_rejection_redeliveries),
            seed_demo_data: var("SEED_DEMO_DATA")
                .map(|value| {
                    matches!(
                        value.trim().to_ascii_lowercase().as_str(),
                        "1" | "true" | "yes"
                    )
                })
                .unwrap_or(defaults.seed_demo_data),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            json_logs: var("LOG_FORMAT")
                .map(|value| value.eq_ignore_ascii_case("json"))
                .unwrap_or(defaults.json_logs),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn publish_confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_confirm_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.publish_max_attempts,
            Duration::from_millis(self.publish_initial_backoff_ms),
            Duration::from_millis(self.publish_max_backoff_ms),
        )
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        let mut config = ConsumerConfig::new(&self.service_name);
        config.max_rejection_redeliveries = self.max_rejection_redeliveries;
        config
    }
}

fn parse<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|value| value.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "inventory".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8083,
            database_url: None,
            database_max_connections: 10,
            kafka_brokers: None,
            rpc_timeout_ms: 5000,
            publish_max_attempts: 3,
            publish_initial_backoff_ms: 100,
            publish_max_backoff_ms: 5000,
            publish_confirm_timeout_ms: 5000,
            max_rejection_redeliveries: 3,
            seed_demo_data: false,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
