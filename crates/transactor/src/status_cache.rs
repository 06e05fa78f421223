//! Cached authorization decisions and the patch applied to them on the
//! fast path.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tracing::debug;

use tollgate_core::{
    Application, RejectionReason, ServiceId, Status, StatusDocument, Usage, UsageReport, User,
};
use tollgate_state::{StateKey, StateStore, WriteBatch};

use crate::error::TransactorError;
use crate::keys;

/// The entity a status document is cached for.
#[derive(Debug, Clone, Copy)]
pub enum CacheEntity<'a> {
    Application(&'a Application),
    User(&'a User),
}

/// Every identity a cached application document is reachable under.
///
/// Identities are `{id}:{app_key}:{referrer}` for each key and referrer
/// filter, with empty segments when the application has none, plus
/// `{user_key}::{referrer}` variants for applications with a user key.
pub fn application_identities(application: &Application) -> Vec<String> {
    let mut bases: Vec<String> = application
        .keys
        .iter()
        .map(|key| format!("{}:{key}", application.id))
        .collect();
    if bases.is_empty() {
        bases.push(format!("{}:", application.id));
    }
    if let Some(user_key) = application.user_key.as_deref().filter(|k| !k.is_empty()) {
        bases.push(format!("{user_key}:"));
    }

    if application.referrer_filters.is_empty() {
        return bases.into_iter().map(|base| format!("{base}:")).collect();
    }

    let mut identities = Vec::with_capacity(bases.len() * application.referrer_filters.len());
    for referrer in &application.referrer_filters {
        for base in &bases {
            identities.push(format!("{base}:{referrer}"));
        }
    }
    identities
}

/// Identity of the document OAuth requests for `application_id` share.
///
/// Kept apart from key identities because the OAuth chain checks neither
/// keys nor referrers.
pub fn oauth_identity(application_id: &str) -> String {
    format!("oauth/{application_id}")
}

/// Status keys of every key identity of `application`.
pub fn application_status_keys(service_id: &ServiceId, application: &Application) -> Vec<StateKey> {
    application_identities(application)
        .iter()
        .map(|identity| keys::application_status(service_id, identity))
        .collect()
}

/// Queue removal of a cached document and its violation-set membership.
pub fn evict(batch: WriteBatch, key: StateKey) -> WriteBatch {
    let member = key.canonical();
    batch.delete(key).set_remove(keys::limit_violations(), member)
}

/// Which cached documents a fully validated decision may be stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    /// Holds for every identity of the application and for the user.
    Shared,
    /// Holds only for the requested key and referrer.
    Requested,
    /// Depends on request parameters no document identity encodes.
    Uncached,
}

/// Classify a decision by what it depends on.
///
/// A limit denial is shared only when the stored counters are over a limit
/// on their own; otherwise the request's usage caused it.
pub fn cache_scope(status: &Status) -> CacheScope {
    match status.reason() {
        None | Some(RejectionReason::ApplicationNotActive | RejectionReason::UserNotActive) => {
            CacheScope::Shared
        }
        Some(RejectionReason::ApplicationKeyInvalid | RejectionReason::ReferrerNotAllowed) => {
            CacheScope::Requested
        }
        Some(RejectionReason::MetricInvalid | RejectionReason::RedirectUrlInvalid) => {
            CacheScope::Uncached
        }
        Some(RejectionReason::LimitsExceeded) => {
            let over = status
                .application_usage
                .iter()
                .chain(status.user_usage.iter())
                .any(|report| report.current_value > report.max_value);
            if over {
                CacheScope::Shared
            } else {
                CacheScope::Uncached
            }
        }
    }
}

fn application_part(document: &StatusDocument) -> StatusDocument {
    let mut part = document.clone();
    part.user_usage.clear();
    part
}

fn user_part(document: &StatusDocument) -> StatusDocument {
    let mut part = document.clone();
    part.application_usage.clear();
    part
}

/// Writes status documents with a TTL truncated to the current minute.
pub struct StatusCache {
    store: Arc<dyn StateStore>,
    status_ttl_seconds: u64,
}

impl StatusCache {
    pub fn new(store: Arc<dyn StateStore>, status_ttl_seconds: u64) -> Self {
        Self {
            store,
            status_ttl_seconds,
        }
    }

    /// Lifetime of a document written at `now`: never past the end of the
    /// current minute, never longer than the configured bound.
    pub fn status_ttl(&self, now: &DateTime<Utc>) -> Duration {
        let to_minute_end = 60 - u64::from(now.second().min(59));
        Duration::from_secs(to_minute_end.min(self.status_ttl_seconds).max(1))
    }

    /// Cache the decision for every identity of `entity`, plus `requested`
    /// when it is not one of them.
    ///
    /// Documents and their violation-set membership are written in one
    /// batch so they always agree on the outcome.
    pub async fn write_status(
        &self,
        service_id: &ServiceId,
        entity: CacheEntity<'_>,
        status: &Status,
        requested: Option<&StateKey>,
    ) -> Result<(), TransactorError> {
        let document = status.to_document();
        let (mut keys, document) = match entity {
            CacheEntity::Application(application) => (
                application_status_keys(service_id, application),
                application_part(&document),
            ),
            CacheEntity::User(user) => (
                vec![keys::user_status(service_id, &user.username)],
                user_part(&document),
            ),
        };
        if let Some(key) = requested
            && !keys.contains(key)
        {
            keys.push(key.clone());
        }

        let written = keys.len();
        let entries: Vec<(StateKey, StatusDocument)> =
            keys.into_iter().map(|key| (key, document.clone())).collect();
        self.write_documents(&entries).await?;

        debug!(
            service_id = %service_id,
            authorized = document.authorized,
            written,
            "status cached"
        );
        Ok(())
    }

    /// Cache the application part of a decision under one key only.
    pub async fn write_requested(
        &self,
        key: &StateKey,
        status: &Status,
    ) -> Result<(), TransactorError> {
        let document = application_part(&status.to_document());
        self.write_documents(&[(key.clone(), document)]).await
    }

    /// Store a patched decision back under the keys it was read from.
    pub async fn refresh(
        &self,
        application_key: &StateKey,
        user_key: Option<&StateKey>,
        document: &StatusDocument,
    ) -> Result<(), TransactorError> {
        let mut entries = vec![(application_key.clone(), application_part(document))];
        if let Some(key) = user_key {
            entries.push((key.clone(), user_part(document)));
        }
        self.write_documents(&entries).await
    }

    async fn write_documents(
        &self,
        entries: &[(StateKey, StatusDocument)],
    ) -> Result<(), TransactorError> {
        let ttl = self.status_ttl(&Utc::now());
        let violations = keys::limit_violations();

        let mut batch = WriteBatch::new();
        for (key, document) in entries {
            let member = key.canonical();
            batch = batch.set(key.clone(), serde_json::to_string(document)?, Some(ttl));
            batch = if document.authorized {
                batch.set_remove(violations.clone(), member)
            } else {
                batch.set_add(violations.clone(), member)
            };
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.store.execute(batch).await?;
        Ok(())
    }
}

/// Combine an application document with the user document of the same
/// decision.
///
/// Authorized only when both are. The user's denial reason wins over the
/// application's.
pub fn merge_documents(
    application: &StatusDocument,
    user: Option<&StatusDocument>,
) -> StatusDocument {
    let authorized = application.authorized && user.is_none_or(|u| u.authorized);
    let reason = match user {
        Some(u) if !u.authorized => u.reason,
        _ => application.reason,
    };
    StatusDocument {
        authorized,
        reason,
        application_id: application.application_id.clone(),
        user_scoped: application.user_scoped || user.is_some(),
        application_usage: application.application_usage.clone(),
        user_usage: user.map(|u| u.user_usage.clone()).unwrap_or_default(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchOptions {
    /// Fold the pending usage into the document's current values.
    pub add_usage_on_report: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    pub document: StatusDocument,
    pub authorized: bool,
    /// The cached decision no longer matches the limits; it must be
    /// recomputed.
    pub violation_just_happened: bool,
}

#[derive(Debug, Default)]
struct ViolationSignals {
    without_usage: bool,
    with_usage: bool,
}

fn patch_reports(
    reports: &mut [UsageReport],
    usage: Option<&Usage>,
    apply: bool,
    signals: &mut ViolationSignals,
) {
    for report in reports {
        let pending = usage.and_then(|u| u.get(&report.metric_name));
        let increment = pending.map_or(0, |v| v.increment());
        let absolute = pending.and_then(|v| v.absolute());
        let current = report.current_value;

        if !signals.without_usage {
            signals.without_usage = current > report.max_value;
        }
        if !signals.with_usage {
            if let Some(value) = absolute {
                signals.with_usage = value > report.max_value;
            } else if increment > 0 {
                signals.with_usage = current.saturating_add(increment) > report.max_value;
            }
        }

        if apply {
            report.current_value = absolute.unwrap_or(current.saturating_add(increment));
        }
    }
}

/// Bring cached documents up to date with the usage of the current request.
///
/// Absolute values take precedence over increments. Usage is folded in only
/// when requested and the cached decision was authorized.
pub fn patch_cached_status(
    application: &StatusDocument,
    user: Option<&StatusDocument>,
    usage: Option<&Usage>,
    options: PatchOptions,
) -> PatchOutcome {
    let mut document = merge_documents(application, user);
    let authorized = document.authorized;
    let apply = authorized && options.add_usage_on_report;

    let mut signals = ViolationSignals::default();
    patch_reports(&mut document.application_usage, usage, apply, &mut signals);
    patch_reports(&mut document.user_usage, usage, apply, &mut signals);

    let violation_just_happened = if authorized {
        signals.without_usage || signals.with_usage
    } else {
        signals.without_usage && !signals.with_usage
    };

    PatchOutcome {
        document,
        authorized,
        violation_just_happened,
    }
}
