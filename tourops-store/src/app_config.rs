use serde::Deserialize;
use std::env;
use std::time::Duration;
use tourops_sync::{RetryPolicy, SyncSettings};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub queue: QueueConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// e.g. `sqlite://data/queue.db`
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub write_timeout_secs: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_secs: u64,
    pub backoff_multiplier: f64,
    pub replay_interval_secs: u64,
    pub synced_retention_secs: u64,
    /// Compare-and-set attempts per transaction on the Redis backend. The memory
    /// store serializes transactions under its lock and never retries.
    pub transaction_max_retries: u32,
    pub breaker_failure_threshold: usize,
    pub breaker_reset_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            write_timeout_secs: 15,
            backoff_initial_ms: 2_000,
            backoff_max_secs: 300,
            backoff_multiplier: 2.0,
            replay_interval_secs: 30,
            synced_retention_secs: 300,
            transaction_max_retries: 25,
            breaker_failure_threshold: 3,
            breaker_reset_secs: 30,
        }
    }
}

impl SyncConfig {
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            retry: RetryPolicy::new()
                .with_initial_delay(Duration::from_millis(self.backoff_initial_ms))
                .with_max_delay(Duration::from_secs(self.backoff_max_secs))
                .with_multiplier(self.backoff_multiplier),
            synced_retention: Duration::from_secs(self.synced_retention_secs),
            breaker_failure_threshold: self.breaker_failure_threshold,
            breaker_reset: Duration::from_secs(self.breaker_reset_secs),
        }
    }

    pub fn replay_interval(&self) -> Duration {
        Duration::from_secs(self.replay_interval_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in.
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `TOUROPS__SYNC__WRITE_TIMEOUT_SECS=5`
            .add_source(config::Environment::with_prefix("TOUROPS").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_section_defaults_and_overrides() {
        let raw = r#"
            [server]
            port = 8080
            [store]
            backend = "memory"
            [queue]
            database_url = "sqlite::memory:"
            [sync]
            write_timeout_secs = 5
            [auth]
            jwt_secret = "test"
        "#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.sync.write_timeout_secs, 5);
        assert_eq!(config.sync.transaction_max_retries, 25);

        let settings = config.sync.settings();
        assert_eq!(settings.write_timeout, Duration::from_secs(5));
        assert_eq!(settings.retry.ceiling(1), Duration::from_secs(2));
    }
}
