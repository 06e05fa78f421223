use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use tollgate_core::{
    Application, ApplicationId, AuthAction, AuthParams, RejectionReason, ReportJob,
    ResolutionError, Service, ServiceId, Status, StatusDocument, Transaction, UsageReport, User,
};
use tollgate_state::StateStore;

use crate::combination::{CombinationCache, CombinationCheck};
use crate::config::TransactorConfig;
use crate::entities::EntityRepository;
use crate::error::TransactorError;
use crate::metrics::TransactorMetrics;
use crate::notify::{self, Notifier};
use crate::queue::ReportQueue;
use crate::status_cache::{
    CacheEntity, CacheScope, PatchOptions, StatusCache, cache_scope, patch_cached_status,
};
use crate::usage::load_usage;
use crate::validators::{self, ValidationContext};

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// A cached status document, patched with the request's usage.
    Cached,
    /// A full validation.
    Computed,
}

/// The answer to an authorization request.
///
/// A denial is a decision like any other; only resolution failures are
/// errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub service_id: ServiceId,
    pub application_id: ApplicationId,
    pub user_id: Option<String>,
    pub status: StatusDocument,
    pub source: DecisionSource,
}

impl Decision {
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.status.authorized
    }

    #[must_use]
    pub fn reason(&self) -> Option<RejectionReason> {
        self.status.reason
    }
}

/// Usage of an application against its limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Utilization {
    pub reports: Vec<UsageReport>,
    /// The report closest to (or furthest past) its limit.
    pub max_record: Option<UsageReport>,
    /// Utilization of `max_record` in percent, rounded.
    pub max_utilization: i64,
}

struct Validated {
    service: Service,
    application: Application,
    user: Option<User>,
    status: Status,
}

/// The authorize/report decision pipeline.
///
/// Construct with [`TransactorBuilder`](crate::TransactorBuilder).
pub struct Transactor {
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) entities: EntityRepository,
    pub(crate) combinations: CombinationCache,
    pub(crate) status_cache: StatusCache,
    pub(crate) queue: Arc<dyn ReportQueue>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) config: TransactorConfig,
    pub(crate) metrics: Arc<TransactorMetrics>,
}

impl std::fmt::Debug for Transactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transactor")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl Transactor {
    pub fn entities(&self) -> &EntityRepository {
        &self.entities
    }

    pub fn metrics(&self) -> &TransactorMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &TransactorConfig {
        &self.config
    }

    /// Decide whether a request may proceed, without recording usage.
    #[instrument(
        name = "transactor.authorize",
        skip_all,
        fields(provider_key = %provider_key, app_id = ?params.app_id())
    )]
    pub async fn authorize(
        &self,
        provider_key: &str,
        params: &AuthParams,
    ) -> Result<Decision, TransactorError> {
        self.authorize_with(AuthAction::Authorize, provider_key, params).await
    }

    /// Like [`authorize`](Self::authorize), for requests that may identify
    /// themselves with an access token.
    #[instrument(
        name = "transactor.oauth_authorize",
        skip_all,
        fields(provider_key = %provider_key, app_id = ?params.app_id())
    )]
    pub async fn oauth_authorize(
        &self,
        provider_key: &str,
        params: &AuthParams,
    ) -> Result<Decision, TransactorError> {
        self.authorize_with(AuthAction::OAuthAuthorize, provider_key, params).await
    }

    /// Authorize and, when authorized, queue the request's usage for
    /// recording.
    #[instrument(
        name = "transactor.authrep",
        skip_all,
        fields(provider_key = %provider_key, app_id = ?params.app_id())
    )]
    pub async fn authrep(
        &self,
        provider_key: &str,
        params: &AuthParams,
    ) -> Result<Decision, TransactorError> {
        self.authrep_with(AuthAction::Authrep, provider_key, params).await
    }

    #[instrument(
        name = "transactor.oauth_authrep",
        skip_all,
        fields(provider_key = %provider_key, app_id = ?params.app_id())
    )]
    pub async fn oauth_authrep(
        &self,
        provider_key: &str,
        params: &AuthParams,
    ) -> Result<Decision, TransactorError> {
        self.authrep_with(AuthAction::OAuthAuthrep, provider_key, params).await
    }

    /// Queue transactions for recording.
    ///
    /// Only the service is resolved; limits are not evaluated. Returns the
    /// id of the service the job was queued for.
    #[instrument(
        name = "transactor.report",
        skip_all,
        fields(provider_key = %provider_key, transactions = transactions.len())
    )]
    pub async fn report(
        &self,
        provider_key: &str,
        service_id: Option<&str>,
        transactions: Vec<Transaction>,
        context: HashMap<String, String>,
    ) -> Result<ServiceId, TransactorError> {
        self.metrics.increment_reports();
        let service_id = service_id.filter(|id| !id.is_empty());
        let service = self.entities.resolve_service(provider_key, service_id).await?;

        let n = transactions.len();
        let job = ReportJob::new(service.id.clone(), transactions, context);
        self.queue.enqueue(job).await?;
        self.notifier.notify(
            provider_key,
            &[(notify::CREATE_MULTIPLE, 1), (notify::TRANSACTIONS, count(n))],
        );
        debug!(service_id = %service.id, transactions = n, "report queued");
        Ok(service.id)
    }

    /// Current usage of an application against its limits, with the most
    /// utilized limit singled out.
    #[instrument(name = "transactor.utilization", skip(self))]
    pub async fn utilization(
        &self,
        service_id: &str,
        application_id: &str,
    ) -> Result<Utilization, TransactorError> {
        let service = self
            .entities
            .service_by_id(service_id)
            .await?
            .ok_or_else(|| ResolutionError::ServiceIdInvalid(service_id.to_owned()))?;
        let application = self
            .entities
            .application_by_id(&service.id, application_id)
            .await?
            .ok_or_else(|| ResolutionError::ApplicationNotFound(Some(application_id.to_owned())))?;

        let snapshot =
            load_usage(self.store.as_ref(), &service, &application, None, &Utc::now()).await?;
        let max_record = most_utilized(&snapshot.application).cloned();
        let max_utilization = max_record.as_ref().map_or(0, percent);

        Ok(Utilization {
            reports: snapshot.application,
            max_record,
            max_utilization,
        })
    }

    pub async fn enable_caching(&self) -> Result<(), TransactorError> {
        self.combinations.enable_caching().await
    }

    pub async fn disable_caching(&self) -> Result<(), TransactorError> {
        self.combinations.disable_caching().await
    }

    /// Whether the store-wide toggle allows the cache. The configuration can
    /// still turn it off locally.
    pub async fn caching_enabled(&self) -> Result<bool, TransactorError> {
        self.combinations.caching_enabled().await
    }

    async fn authorize_with(
        &self,
        action: AuthAction,
        provider_key: &str,
        params: &AuthParams,
    ) -> Result<Decision, TransactorError> {
        self.metrics.increment_authorizations();
        let decision = self.decide(action, provider_key, params).await?;
        self.notifier.notify(provider_key, &[(notify::AUTHORIZE, 1)]);
        Ok(decision)
    }

    async fn authrep_with(
        &self,
        action: AuthAction,
        provider_key: &str,
        params: &AuthParams,
    ) -> Result<Decision, TransactorError> {
        self.metrics.increment_authreps();
        let decision = match self.decide(action, provider_key, params).await {
            Ok(decision) => decision,
            Err(e) => {
                // These still count as authorize calls for the provider.
                if matches!(
                    e.as_resolution(),
                    Some(
                        ResolutionError::ApplicationNotFound(_)
                            | ResolutionError::UserNotDefined(_)
                    )
                ) {
                    self.notifier.notify(provider_key, &[(notify::AUTHORIZE, 1)]);
                }
                return Err(e);
            }
        };

        let usage = params.usage.as_ref().filter(|u| !u.is_empty());
        if !decision.is_authorized() || (usage.is_none() && params.log.is_none()) {
            self.notifier.notify(provider_key, &[(notify::AUTHORIZE, 1)]);
            return Ok(decision);
        }

        let transaction = Transaction {
            application_id: Some(decision.application_id.clone()),
            usage: usage.cloned().unwrap_or_default(),
            user_id: decision.user_id.clone(),
            log: params.log.clone(),
            ..Transaction::default()
        };
        let job = ReportJob::new(decision.service_id.clone(), vec![transaction], HashMap::new());
        if let Err(e) = self.queue.enqueue(job).await {
            self.metrics.increment_enqueue_failures();
            warn!(service_id = %decision.service_id, error = %e, "failed to queue authrep usage");
        }
        self.notifier.notify(
            provider_key,
            &[
                (notify::AUTHORIZE, 1),
                (notify::CREATE_MULTIPLE, 1),
                (notify::TRANSACTIONS, count(usage.map_or(0, |u| u.len()))),
            ],
        );
        Ok(decision)
    }

    /// Serve from the cache when possible, otherwise validate fully and
    /// write the result back.
    async fn decide(
        &self,
        action: AuthAction,
        provider_key: &str,
        params: &AuthParams,
    ) -> Result<Decision, TransactorError> {
        let check = if self.config.caching.enabled {
            Some(
                self.combinations
                    .check_combination(action, provider_key, params)
                    .await?,
            )
        } else {
            None
        };

        if let Some(check) = &check
            && let Some(decision) = self.cached_decision(action, params, check)
        {
            // The next hit must start from the usage folded in here.
            if action.reports_usage()
                && decision.is_authorized()
                && params.usage.as_ref().is_some_and(|u| !u.is_empty())
                && let Some(key) = &check.application_status_key
            {
                let user_key = check
                    .user_status_key
                    .as_ref()
                    .filter(|_| decision.user_id.is_some());
                self.status_cache
                    .refresh(key, user_key, &decision.status)
                    .await?;
            }
            return Ok(decision);
        }

        let validated = self.validate(action, provider_key, params).await?;

        if let Some(check) = check.as_ref().filter(|c| c.caching_enabled) {
            self.cache_validated(check, &validated).await?;
        }

        let status = validated.status;
        debug!(
            authorized = status.is_authorized(),
            reason = ?status.reason(),
            "decision computed"
        );
        Ok(Decision {
            service_id: validated.service.id,
            application_id: validated.application.id,
            user_id: status.user_id.clone(),
            status: status.to_document(),
            source: DecisionSource::Computed,
        })
    }

    /// Write a full validation back to the cache and remember its
    /// combination, as far as the decision holds beyond this request.
    async fn cache_validated(
        &self,
        check: &CombinationCheck,
        validated: &Validated,
    ) -> Result<(), TransactorError> {
        let service_id = &validated.service.id;
        let requested = check.application_status_key.as_ref();
        match cache_scope(&validated.status) {
            CacheScope::Shared => {
                self.status_cache
                    .write_status(
                        service_id,
                        CacheEntity::Application(&validated.application),
                        &validated.status,
                        requested,
                    )
                    .await?;
                if let Some(user) = &validated.user {
                    self.status_cache
                        .write_status(service_id, CacheEntity::User(user), &validated.status, None)
                        .await?;
                }
            }
            CacheScope::Requested => {
                let Some(key) = requested else {
                    return Ok(());
                };
                self.status_cache
                    .write_requested(key, &validated.status)
                    .await?;
            }
            CacheScope::Uncached => {
                debug!(
                    reason = ?validated.status.reason(),
                    "decision depends on the request, not cached"
                );
                return Ok(());
            }
        }
        self.combinations
            .record_combination(check.signature.as_ref(), check.version_vector.as_deref())
            .await
    }

    fn cached_decision(
        &self,
        action: AuthAction,
        params: &AuthParams,
        check: &CombinationCheck,
    ) -> Option<Decision> {
        let cached = match (check.caching_enabled && check.known, &check.service_id) {
            (true, Some(service_id)) => check
                .application_document
                .as_ref()
                .map(|doc| (service_id, doc)),
            _ => None,
        };
        let Some((service_id, application_doc)) = cached else {
            self.metrics.increment_cache_misses();
            debug!(known = check.known, "cache miss");
            return None;
        };

        let user_doc = if application_doc.user_scoped {
            let Some(doc) = check.user_document.as_ref() else {
                self.metrics.increment_cache_misses();
                debug!("cache miss on user status");
                return None;
            };
            Some(doc)
        } else {
            None
        };

        let outcome = patch_cached_status(
            application_doc,
            user_doc,
            params.usage.as_ref(),
            PatchOptions {
                add_usage_on_report: action.reports_usage(),
            },
        );
        if outcome.violation_just_happened {
            self.metrics.increment_cache_fallbacks();
            debug!(authorized = outcome.authorized, "cached status is stale, revalidating");
            return None;
        }

        self.metrics.increment_cache_hits();
        debug!(authorized = outcome.authorized, "cache hit");
        Some(Decision {
            service_id: service_id.clone(),
            application_id: outcome.document.application_id.clone(),
            user_id: params
                .user_id()
                .filter(|_| user_doc.is_some())
                .map(str::to_owned),
            status: outcome.document,
            source: DecisionSource::Cached,
        })
    }

    /// Resolve every entity the request names and run the validator chain.
    async fn validate(
        &self,
        action: AuthAction,
        provider_key: &str,
        params: &AuthParams,
    ) -> Result<Validated, TransactorError> {
        let service = self
            .entities
            .resolve_service(provider_key, params.service_id())
            .await?;

        let mut application_id = params.app_id().map(str::to_owned);
        let mut user_id = params.user_id().map(str::to_owned);
        if action.is_oauth() && (application_id.is_none() || user_id.is_none()) {
            match params.access_token() {
                Some(token) => {
                    match self.entities.access_token_credentials(&service.id, token).await {
                        Ok(credentials) => {
                            application_id
                                .get_or_insert_with(|| credentials.application_id.to_string());
                            if user_id.is_none() {
                                user_id = credentials.user_id;
                            }
                        }
                        // An explicit application id is enough to go on with.
                        Err(TransactorError::Resolution(e)) if application_id.is_some() => {
                            debug!(error = %e, "ignoring unusable access token");
                        }
                        Err(e) => return Err(e),
                    }
                }
                None if application_id.is_none() => {
                    return Err(ResolutionError::ApplicationNotFound(None).into());
                }
                None => {}
            }
        }

        let application = self
            .entities
            .application_by_id_or_user_key(
                &service.id,
                application_id.as_deref(),
                params.user_key(),
            )
            .await?;

        let user = if application.user_required {
            let Some(username) = user_id.as_deref() else {
                return Err(ResolutionError::UserNotDefined(application.id.to_string()).into());
            };
            let user = self
                .entities
                .user_load_or_create(&service, username)
                .await?
                .ok_or_else(|| ResolutionError::UserRequiresRegistration {
                    service_id: service.id.to_string(),
                    user_id: username.to_owned(),
                })?;
            Some(user)
        } else {
            None
        };

        let usage = load_usage(
            self.store.as_ref(),
            &service,
            &application,
            user.as_ref(),
            &Utc::now(),
        )
        .await?;
        let mut status = Status::new(
            service.id.clone(),
            application.id.clone(),
            user.as_ref().map(|u| u.username.clone()),
            usage.application,
            usage.user,
        );
        status.usage = params.usage.clone();

        let chain = if action.is_oauth() {
            validators::OAUTH
        } else {
            validators::STANDARD
        };
        let ctx = ValidationContext {
            service: &service,
            application: &application,
            user: user.as_ref(),
            params,
        };
        validators::apply_chain(chain, &ctx, &mut status);

        // Only usage about to be recorded is reflected in the document.
        if !action.reports_usage() {
            status.usage = None;
        }

        Ok(Validated {
            service,
            application,
            user,
            status,
        })
    }
}

/// The report with the highest current/max ratio; limits of zero count as
/// unused. The first one wins ties.
fn most_utilized(reports: &[UsageReport]) -> Option<&UsageReport> {
    let ratio = |r: &UsageReport| {
        if r.max_value > 0 {
            (i128::from(r.current_value), i128::from(r.max_value))
        } else {
            (0, 1)
        }
    };
    let mut best: Option<&UsageReport> = None;
    for report in reports {
        let replace = best.is_none_or(|b| {
            let (n, d) = ratio(report);
            let (bn, bd) = ratio(b);
            n * bd > bn * d
        });
        if replace {
            best = Some(report);
        }
    }
    best
}

fn percent(report: &UsageReport) -> i64 {
    if report.max_value <= 0 {
        return 0;
    }
    let current = i128::from(report.current_value);
    let max = i128::from(report.max_value);
    let rounded = (current * 200 + max).div_euclid(2 * max);
    i64::try_from(rounded).unwrap_or(i64::MAX)
}
