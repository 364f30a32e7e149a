use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_millis(10_000),
            max_retries: 3,
            retry_delay: Duration::from_millis(1_000),
        }
    }

    pub fn new_from_env() -> Result<Self, AppError> {
        let base_url = env::var("LESSONS_API_URL")
            .map_err(|_| AppError::Config("LESSONS_API_URL is not set".to_string()))?;

        let mut config = Self::new(base_url);
        config.timeout = Duration::from_millis(env_or("LESSONS_API_TIMEOUT_MS", 10_000)?);
        config.max_retries = env_or("LESSONS_API_MAX_RETRIES", 3)?;
        config.retry_delay = Duration::from_millis(env_or("LESSONS_API_RETRY_DELAY_MS", 1_000)?);
        Ok(config)
    }
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub ttl: chrono::Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: chrono::Duration::minutes(5),
        }
    }
}

/// Settings for the sync-channel server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub sweep_interval: Duration,
    pub inactive_after: chrono::Duration,
    pub event_retention: chrono::Duration,
    pub recent_capacity: usize,
    pub replay_count: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3001".to_string(),
            sweep_interval: Duration::from_secs(5 * 60),
            inactive_after: chrono::Duration::minutes(5),
            event_retention: chrono::Duration::hours(24),
            recent_capacity: 100,
            replay_count: 20,
        }
    }
}

impl ServerConfig {
    pub fn new_from_env() -> Result<Self, AppError> {
        let defaults = Self::default();
        Ok(Self {
            bind_addr: env::var("SYNC_BIND_ADDR").unwrap_or(defaults.bind_addr),
            sweep_interval: Duration::from_secs(env_or("SYNC_SWEEP_INTERVAL_SECS", 300)?),
            inactive_after: chrono::Duration::seconds(env_or("SYNC_INACTIVE_AFTER_SECS", 300)?),
            event_retention: chrono::Duration::seconds(env_or("SYNC_EVENT_RETENTION_SECS", 86_400)?),
            recent_capacity: env_or("SYNC_RECENT_CAPACITY", defaults.recent_capacity)?,
            replay_count: env_or("SYNC_REPLAY_COUNT", defaults.replay_count)?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct SyncClientConfig {
    /// Websocket endpoint, e.g. `ws://127.0.0.1:3001/ws`.
    pub url: String,
    pub reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
}

impl SyncClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(60),
        }
    }

    pub fn new_from_env() -> Result<Self, AppError> {
        let url = env::var("SYNC_URL")
            .map_err(|_| AppError::Config("SYNC_URL is not set".to_string()))?;
        let mut config = Self::new(url);
        config.reconnect_delay = Duration::from_millis(env_or("SYNC_RECONNECT_DELAY_MS", 2_000)?);
        config.heartbeat_interval = Duration::from_secs(env_or("SYNC_HEARTBEAT_SECS", 60)?);
        Ok(config)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}
