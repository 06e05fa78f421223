use std::sync::Arc;

use tollgate_state::StateStore;

use crate::combination::CombinationCache;
use crate::config::TransactorConfig;
use crate::entities::EntityRepository;
use crate::error::TransactorError;
use crate::metrics::TransactorMetrics;
use crate::notify::Notifier;
use crate::queue::ReportQueue;
use crate::service_cache::ServiceIdCache;
use crate::status_cache::StatusCache;
use crate::transactor::Transactor;

/// Fluent builder for constructing a [`Transactor`].
///
/// A [`StateStore`], a [`ReportQueue`] and a [`Notifier`] must be supplied.
/// The configuration defaults to [`TransactorConfig::default`].
#[derive(Default)]
pub struct TransactorBuilder {
    state: Option<Arc<dyn StateStore>>,
    queue: Option<Arc<dyn ReportQueue>>,
    notifier: Option<Arc<dyn Notifier>>,
    config: TransactorConfig,
}

impl TransactorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backing store.
    #[must_use]
    pub fn state(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state = Some(store);
        self
    }

    /// Set the queue accepted usage is handed to.
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn ReportQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the receiver of usage-tracking counters.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn config(mut self, config: TransactorConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the transactor.
    ///
    /// # Errors
    ///
    /// Returns [`TransactorError::Configuration`] if a required component is
    /// missing.
    pub fn build(self) -> Result<Transactor, TransactorError> {
        let store = self
            .state
            .ok_or_else(|| TransactorError::Configuration("state store is required".into()))?;
        let queue = self
            .queue
            .ok_or_else(|| TransactorError::Configuration("report queue is required".into()))?;
        let notifier = self
            .notifier
            .ok_or_else(|| TransactorError::Configuration("notifier is required".into()))?;

        let entities = EntityRepository::new(Arc::clone(&store));
        let caching = &self.config.caching;
        let combinations = CombinationCache::new(
            Arc::clone(&store),
            entities.clone(),
            ServiceIdCache::new(caching.service_id_ttl()),
            caching.combination_ttl(),
        );
        let status_cache = StatusCache::new(Arc::clone(&store), caching.status_ttl_seconds);

        Ok(Transactor {
            store,
            entities,
            combinations,
            status_cache,
            queue,
            notifier,
            config: self.config,
            metrics: Arc::new(TransactorMetrics::default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use tollgate_state_memory::MemoryStateStore;

    use super::*;
    use crate::notify::RecordingNotifier;
    use crate::queue::MemoryReportQueue;

    #[test]
    fn build_missing_state_returns_error() {
        let result = TransactorBuilder::new()
            .queue(Arc::new(MemoryReportQueue::new()))
            .notifier(Arc::new(RecordingNotifier::new()))
            .build();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("state store is required"));
    }

    #[test]
    fn build_missing_queue_returns_error() {
        let result = TransactorBuilder::new()
            .state(Arc::new(MemoryStateStore::new()))
            .notifier(Arc::new(RecordingNotifier::new()))
            .build();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("report queue is required"));
    }

    #[test]
    fn build_missing_notifier_returns_error() {
        let result = TransactorBuilder::new()
            .state(Arc::new(MemoryStateStore::new()))
            .queue(Arc::new(MemoryReportQueue::new()))
            .build();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("notifier is required"));
    }

    #[test]
    fn build_with_required_fields_succeeds() {
        let transactor = TransactorBuilder::new()
            .state(Arc::new(MemoryStateStore::new()))
            .queue(Arc::new(MemoryReportQueue::new()))
            .notifier(Arc::new(RecordingNotifier::new()))
            .config(TransactorConfig::from_toml("[caching]\nenabled = false").unwrap())
            .build()
            .unwrap();
        assert!(!transactor.config().caching.enabled);
    }
}
