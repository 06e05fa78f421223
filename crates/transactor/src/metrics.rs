use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters tracking pipeline outcomes.
///
/// All counters use relaxed ordering. For a consistent point-in-time view,
/// call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct TransactorMetrics {
    /// Authorize calls, OAuth included.
    pub authorizations: AtomicU64,
    /// Authrep calls, OAuth included.
    pub authreps: AtomicU64,
    /// Report calls.
    pub reports: AtomicU64,
    /// Decisions served from the status cache.
    pub cache_hits: AtomicU64,
    /// Requests whose combination was unknown or had no cached document.
    pub cache_misses: AtomicU64,
    /// Cached decisions discarded because a limit crossing was detected.
    pub cache_fallbacks: AtomicU64,
    /// Report jobs the queue refused.
    pub enqueue_failures: AtomicU64,
}

impl TransactorMetrics {
    pub fn increment_authorizations(&self) {
        self.authorizations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_authreps(&self) {
        self.authreps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reports(&self) {
        self.reports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_fallbacks(&self) {
        self.cache_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_enqueue_failures(&self) {
        self.enqueue_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            authorizations: self.authorizations.load(Ordering::Relaxed),
            authreps: self.authreps.load(Ordering::Relaxed),
            reports: self.reports.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_fallbacks: self.cache_fallbacks.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`TransactorMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub authorizations: u64,
    pub authreps: u64,
    pub reports: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_fallbacks: u64,
    pub enqueue_failures: u64,
}
