//! Type-safe configuration loader using the `config` crate,
//! with manual environment-variable overrides for core settings.
//!
//! Every setting has a compiled-in default matching the fixed addresses the
//! relay is deployed with (queue at `redis:6379`, database at `db`), so the
//! binary runs with no config file and no environment at all.

use serde::Deserialize;
use humantime_serde;
use humantime;
use std::{env, time::Duration};
use config::{Config, ConfigError, File};

/// Top-level application settings loaded from `Config.toml`
/// and then overridden (where applicable) by environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Redis connection URL for the vote queue
    pub queue_url: String,

    /// Postgres connection URL
    pub database_url: String,

    /// Delay between relay loop iterations (bounds the polling rate)
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Fixed backoff between connection attempts
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,

    /// HTTP bind address for metrics & health endpoints
    pub server_bind: String,
}

/// Reconnect policy: fixed backoff, optionally capped attempt count.
///
/// Production runs with `max_attempts = None` — connection establishment
/// retries forever. Tests inject a finite cap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded(backoff: Duration) -> Self {
        RetryPolicy { backoff, max_attempts: None }
    }

    pub fn capped(backoff: Duration, max_attempts: u32) -> Self {
        RetryPolicy { backoff, max_attempts: Some(max_attempts) }
    }
}

impl Settings {
    /// Load settings from `Config.toml` (if present),
    /// then apply any overrides from these environment variables:
    ///
    /// - `APP__QUEUE_URL`
    /// - `APP__DATABASE_URL`
    /// - `APP__POLL_INTERVAL`
    /// - `APP__RETRY_BACKOFF`
    /// - `APP__SERVER_BIND`
    pub fn new() -> Result<Self, ConfigError> {
        // 1) Compiled-in defaults, then Config.toml on top
        let cfg = Config::builder()
            .set_default("queue_url", "redis://redis:6379")?
            .set_default("database_url", "postgres://postgres:postgres@db/postgres")?
            .set_default("poll_interval", "100ms")?
            .set_default("retry_backoff", "1s")?
            .set_default("server_bind", "0.0.0.0:9090")?
            .add_source(File::with_name("Config").required(false))
            .build()?;

        // Deserialize everything straight away
        let mut settings: Settings = cfg.try_deserialize()?;

        // 2) Manual overrides for core settings
        if let Ok(val) = env::var("APP__QUEUE_URL") {
            settings.queue_url = val;
        }
        if let Ok(val) = env::var("APP__DATABASE_URL") {
            settings.database_url = val;
        }
        if let Ok(val) = env::var("APP__POLL_INTERVAL") {
            settings.poll_interval = humantime::parse_duration(&val)
                .map_err(|e| ConfigError::Foreign(Box::new(e)))?;
        }
        if let Ok(val) = env::var("APP__RETRY_BACKOFF") {
            settings.retry_backoff = humantime::parse_duration(&val)
                .map_err(|e| ConfigError::Foreign(Box::new(e)))?;
        }
        if let Ok(val) = env::var("APP__SERVER_BIND") {
            settings.server_bind = val;
        }

        Ok(settings)
    }

    /// The reconnect policy used by both outbound connections.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::unbounded(self.retry_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fixed_deployment() {
        let settings = Settings::new().expect("defaults should load");
        assert_eq!(settings.queue_url, "redis://redis:6379");
        assert_eq!(settings.database_url, "postgres://postgres:postgres@db/postgres");
        assert_eq!(settings.poll_interval, Duration::from_millis(100));
        assert_eq!(settings.retry_backoff, Duration::from_secs(1));
    }

    #[test]
    fn retry_policy_is_unbounded_by_default() {
        let settings = Settings::new().expect("defaults should load");
        let policy = settings.retry_policy();
        assert_eq!(policy.backoff, Duration::from_secs(1));
        assert!(policy.max_attempts.is_none());
    }
}
