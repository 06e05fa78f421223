use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use tollgate_core::ServiceId;

#[derive(Debug, Clone)]
struct CachedServiceId {
    service_id: ServiceId,
    cached_at: Instant,
}

/// Short-lived memo of provider key to default service id lookups.
///
/// Entries older than the staleness window are ignored; the store stays
/// authoritative.
#[derive(Debug)]
pub struct ServiceIdCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedServiceId>>,
}

impl ServiceIdCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The memoized service id, if it is still fresh.
    pub fn lookup(&self, provider_key: &str) -> Option<ServiceId> {
        let map = self.entries.read();
        map.get(provider_key)
            .filter(|c| c.cached_at.elapsed() < self.ttl)
            .map(|c| c.service_id.clone())
    }

    pub fn store(&self, provider_key: &str, service_id: ServiceId) {
        self.entries.write().insert(
            provider_key.to_owned(),
            CachedServiceId {
                service_id,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, provider_key: &str) {
        self.entries.write().remove(provider_key);
    }
}
