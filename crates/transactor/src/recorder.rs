use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, instrument, warn};

use tollgate_core::{Application, Period, ReportJob, ResolutionError, Service, UsageValue};
use tollgate_state::{StateKey, StateStore, WriteBatch};

use crate::entities::EntityRepository;
use crate::error::TransactorError;
use crate::keys;
use crate::status_cache::{application_status_keys, evict, oauth_identity};

/// Applies accepted usage to the per-metric, per-period counters.
pub struct UsageRecorder {
    store: Arc<dyn StateStore>,
    entities: EntityRepository,
}

fn push_usage(batch: WriteBatch, key: StateKey, value: UsageValue) -> WriteBatch {
    match value {
        UsageValue::Increment(n) => batch.increment(key, n),
        UsageValue::Set(v) => batch.set(key, v.to_string(), None),
    }
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        let entities = EntityRepository::new(Arc::clone(&store));
        Self { store, entities }
    }

    async fn application(
        &self,
        service: &Service,
        application_id: Option<&str>,
        user_key: Option<&str>,
    ) -> Result<Option<Application>, TransactorError> {
        match self
            .entities
            .application_by_id_or_user_key(&service.id, application_id, user_key)
            .await
        {
            Ok(application) => Ok(Some(application)),
            Err(TransactorError::Resolution(e)) => {
                warn!(service_id = %service.id, error = %e, "skipping transaction");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Record every transaction of `job` in one atomic batch.
    ///
    /// Cached status documents of every application and user whose counters
    /// change are evicted in the same batch. Transactions naming unknown
    /// applications or metrics are skipped.
    #[instrument(name = "recorder.apply", skip_all, fields(service_id = %job.service_id))]
    pub async fn apply(&self, job: &ReportJob) -> Result<(), TransactorError> {
        let service = self
            .entities
            .service_by_id(&job.service_id)
            .await?
            .ok_or_else(|| ResolutionError::ServiceIdInvalid(job.service_id.to_string()))?;

        let mut batch = WriteBatch::new();
        let mut stale: HashSet<StateKey> = HashSet::new();
        for transaction in &job.transactions {
            let Some(application) = self
                .application(
                    &service,
                    transaction.application_id.as_deref(),
                    transaction.user_key.as_deref(),
                )
                .await?
            else {
                continue;
            };
            let at = transaction.timestamp.unwrap_or(job.enqueued_at);
            let user = transaction.user_id.as_deref().filter(|u| !u.is_empty());

            let mut recorded = false;
            for (name, value) in &transaction.usage {
                let Some(metric) = service.metric_by_name(name) else {
                    warn!(metric = %name, "skipping usage of unknown metric");
                    continue;
                };
                for period in Period::ALL {
                    let key = keys::application_usage(
                        &service.id,
                        &application.id,
                        &metric.id,
                        period,
                        &at,
                    );
                    batch = push_usage(batch, key, *value);
                    if let Some(username) = user {
                        let key = keys::user_usage(&service.id, username, &metric.id, period, &at);
                        batch = push_usage(batch, key, *value);
                    }
                }
                recorded = true;
            }

            if recorded {
                stale.extend(application_status_keys(&service.id, &application));
                stale.insert(keys::application_status(
                    &service.id,
                    &oauth_identity(&application.id),
                ));
                if let Some(username) = user {
                    stale.insert(keys::user_status(&service.id, username));
                }
            }
        }

        if batch.is_empty() {
            return Ok(());
        }
        let evicted = stale.len();
        for key in stale {
            batch = evict(batch, key);
        }
        let writes = batch.len();
        self.store.execute(batch).await?;
        debug!(writes, evicted, "usage recorded");
        Ok(())
    }

    /// Apply jobs from `rx` until every sender is gone.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<ReportJob>) {
        while let Some(job) = rx.recv().await {
            if let Err(e) = self.apply(&job).await {
                error!(service_id = %job.service_id, error = %e, "failed to record usage");
            }
        }
        debug!("report queue closed, recorder stopping");
    }
}
