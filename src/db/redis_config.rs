use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub redis_url: String,
    pub pool_size: u32,
    pub connection_timeout: Duration,
    pub command_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl RedisConfig {
    /// Reads connection settings from the process environment, falling
    /// back to conservative defaults — the gateway's own `Config value`
    /// (spec.md §6) is built from this, not read by the core itself.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            pool_size: env_or("REDIS_POOL_SIZE", 16),
            connection_timeout: Duration::from_secs(env_or("REDIS_CONNECTION_TIMEOUT_SECS", 5)),
            command_timeout: Duration::from_secs(env_or("REDIS_COMMAND_TIMEOUT_SECS", 3)),
            retry_attempts: env_or("REDIS_RETRY_ATTEMPTS", 3),
            retry_delay: Duration::from_millis(env_or("REDIS_RETRY_DELAY_MS", 100)),
            idle_timeout: Duration::from_secs(env_or("REDIS_IDLE_TIMEOUT_SECS", 300)),
            max_lifetime: Duration::from_secs(env_or("REDIS_MAX_LIFETIME_SECS", 3600)),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.redis_url.is_empty() {
            return Err("Redis URL cannot be empty".to_string());
        }
        if self.pool_size == 0 {
            return Err("Pool size must be greater than 0".to_string());
        }
        if self.pool_size > 1000 {
            return Err("Pool size too large (max: 1000)".to_string());
        }
        if self.connection_timeout.as_secs() == 0 {
            return Err("Connection timeout must be greater than 0".to_string());
        }
        if self.command_timeout.as_secs() == 0 {
            return Err("Command timeout must be greater than 0".to_string());
        }
        if self.retry_attempts == 0 {
            return Err("Retry attempts must be greater than 0".to_string());
        }
        Ok(())
    }
}
