use std::time::Duration;

use serde::Deserialize;

use crate::error::TransactorError;

/// Top-level transactor configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactorConfig {
    #[serde(default)]
    pub caching: CachingConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl TransactorConfig {
    /// Parse a configuration document. Missing sections and fields fall back
    /// to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`TransactorError::Configuration`] when the document is not
    /// valid TOML or a field has the wrong type.
    pub fn from_toml(source: &str) -> Result<Self, TransactorError> {
        toml::from_str(source).map_err(|e| TransactorError::Configuration(e.to_string()))
    }
}

/// Authorization cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CachingConfig {
    /// Whether the fast path is attempted at all. The store-wide toggle
    /// (`settings/caching_enabled`) applies on top of this.
    #[serde(default = "default_caching_enabled")]
    pub enabled: bool,

    /// Lifetime of a recorded version vector.
    #[serde(default = "default_combination_ttl_seconds")]
    pub combination_ttl_seconds: u64,

    /// Upper bound on the lifetime of a cached status document. Documents
    /// always expire at the end of the current minute.
    #[serde(default = "default_status_ttl_seconds")]
    pub status_ttl_seconds: u64,

    /// How long a provider key to service id lookup is memoized.
    #[serde(default = "default_service_id_ttl_seconds")]
    pub service_id_ttl_seconds: u64,
}

fn default_caching_enabled() -> bool {
    true
}

fn default_combination_ttl_seconds() -> u64 {
    3600
}

fn default_status_ttl_seconds() -> u64 {
    60
}

fn default_service_id_ttl_seconds() -> u64 {
    300
}

impl CachingConfig {
    #[must_use]
    pub fn combination_ttl(&self) -> Duration {
        Duration::from_secs(self.combination_ttl_seconds)
    }

    #[must_use]
    pub fn service_id_ttl(&self) -> Duration {
        Duration::from_secs(self.service_id_ttl_seconds)
    }
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            enabled: default_caching_enabled(),
            combination_ttl_seconds: default_combination_ttl_seconds(),
            status_ttl_seconds: default_status_ttl_seconds(),
            service_id_ttl_seconds: default_service_id_ttl_seconds(),
        }
    }
}

/// Usage-tracking notification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Number of notify calls coalesced before a batch is emitted.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    100
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}
