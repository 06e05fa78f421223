use std::time::Duration;

use serde::Deserialize;

/// Configuration for the Redis state store backend.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g. `redis://127.0.0.1:6379`).
    #[serde(default = "default_url")]
    pub url: String,

    /// Key prefix applied to every Redis key to avoid collisions.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Number of connections in the `deadpool-redis` pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Timeout for acquiring a pooled connection, in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_owned()
}

fn default_prefix() -> String {
    "tollgate".to_owned()
}

fn default_pool_size() -> usize {
    10
}

fn default_connection_timeout_ms() -> u64 {
    5000
}

impl RedisConfig {
    /// Configuration for the given URL with default pool settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            prefix: default_prefix(),
            pool_size: default_pool_size(),
            connection_timeout_ms: default_connection_timeout_ms(),
        }
    }
}
