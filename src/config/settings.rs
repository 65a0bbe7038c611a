//! Application settings loaded from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use super::constants::{
    DEFAULT_DATABASE_URL, DEFAULT_DB_ACQUIRE_TIMEOUT_MS, DEFAULT_DB_MAX_CONNECTIONS,
    DEFAULT_DB_MIN_CONNECTIONS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SERVER_HOST,
    DEFAULT_SERVER_PORT,
};
use crate::infra::{IsolationLevel, PoolOptions, TransactionOptions};

/// Application configuration
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_min_connections: u32,
    pub database_acquire_timeout_ms: u64,
    pub database_isolation_level: IsolationLevel,
    pub database_run_migrations: bool,
    pub server_host: String,
    pub server_port: u16,
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("database_max_connections", &self.database_max_connections)
            .field("database_min_connections", &self.database_min_connections)
            .field("database_acquire_timeout_ms", &self.database_acquire_timeout_ms)
            .field("database_isolation_level", &self.database_isolation_level)
            .field("database_run_migrations", &self.database_run_migrations)
            .field("server_host", &self.server_host)
            .field("server_port", &self.server_port)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env`).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup; unset or malformed values
    /// fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let database_isolation_level = match lookup("DATABASE_ISOLATION_LEVEL") {
            Some(raw) => raw.parse::<IsolationLevel>().unwrap_or_else(|e| {
                tracing::warn!("{}, using {}", e, IsolationLevel::default());
                IsolationLevel::default()
            }),
            None => IsolationLevel::default(),
        };

        let database_run_migrations = lookup("DATABASE_RUN_MIGRATIONS")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(true);

        Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            database_max_connections: parse_or(lookup("DATABASE_MAX_CONNECTIONS"), DEFAULT_DB_MAX_CONNECTIONS),
            database_min_connections: parse_or(lookup("DATABASE_MIN_CONNECTIONS"), DEFAULT_DB_MIN_CONNECTIONS),
            database_acquire_timeout_ms: parse_or(lookup("DATABASE_ACQUIRE_TIMEOUT_MS"), DEFAULT_DB_ACQUIRE_TIMEOUT_MS),
            database_isolation_level,
            database_run_migrations,
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string()),
            server_port: parse_or(lookup("SERVER_PORT"), DEFAULT_SERVER_PORT),
            request_timeout_secs: parse_or(lookup("REQUEST_TIMEOUT_SECS"), DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Pool sizing for the connection provider.
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions::new(self.database_max_connections)
            .min_connections(self.database_min_connections)
            .acquire_timeout(Duration::from_millis(self.database_acquire_timeout_ms))
    }

    /// Default options for every unit of work.
    pub fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions::new(self.database_isolation_level)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get the full server address.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::default();
        assert_eq!(config.database_max_connections, DEFAULT_DB_MAX_CONNECTIONS);
        assert_eq!(config.database_isolation_level, IsolationLevel::ReadCommitted);
        assert!(config.database_run_migrations);
        assert_eq!(config.server_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_pool_and_transaction_options_follow_env() {
        let config = config_from(&[
            ("DATABASE_MAX_CONNECTIONS", "4"),
            ("DATABASE_MIN_CONNECTIONS", "9"),
            ("DATABASE_ACQUIRE_TIMEOUT_MS", "250"),
            ("DATABASE_ISOLATION_LEVEL", "repeatable read"),
            ("DATABASE_RUN_MIGRATIONS", "false"),
        ]);

        let pool = config.pool_options();
        assert_eq!(pool.max_connections, 4);
        assert_eq!(pool.min_connections, 4);
        assert_eq!(pool.acquire_timeout, Duration::from_millis(250));
        assert_eq!(
            config.transaction_options(),
            TransactionOptions::new(IsolationLevel::RepeatableRead)
        );
        assert!(!config.database_run_migrations);
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let config = config_from(&[
            ("SERVER_PORT", "not-a-port"),
            ("DATABASE_ISOLATION_LEVEL", "snapshot"),
        ]);
        assert_eq!(config.server_port, DEFAULT_SERVER_PORT);
        assert_eq!(config.database_isolation_level, IsolationLevel::ReadCommitted);
    }

    #[test]
    fn test_debug_redacts_database_url() {
        let config = config_from(&[("DATABASE_URL", "postgres://u:hunter2@db/ledger")]);
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
