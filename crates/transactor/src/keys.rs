//! Storage layout for entities, usage counters and cache entries.

use chrono::{DateTime, Utc};

use tollgate_core::{ApplicationId, MetricId, Period, ServiceId};
use tollgate_state::{KeyKind, StateKey};

pub fn service(service_id: &ServiceId) -> StateKey {
    StateKey::new(KeyKind::Service, service_id.as_str())
}

pub fn service_version(service_id: &str) -> StateKey {
    StateKey::new(KeyKind::Service, format!("{service_id}/version"))
}

/// Index from a provider key to its default service.
pub fn provider_service_id(provider_key: &str) -> StateKey {
    StateKey::new(KeyKind::Service, format!("provider_key:{provider_key}/id"))
}

pub fn application(service_id: &ServiceId, application_id: &str) -> StateKey {
    StateKey::new(
        KeyKind::Application,
        format!("service:{service_id}/id:{application_id}"),
    )
}

/// Version of an application, addressed by id or by user key.
///
/// User keys live under their own index so a user-key request can be
/// validated against a version without resolving the application first.
pub fn application_version(service_id: &str, application_id: &str) -> StateKey {
    StateKey::new(
        KeyKind::Application,
        format!("service:{service_id}/id:{application_id}/version"),
    )
}

pub fn user_key_index(service_id: &ServiceId, user_key: &str) -> StateKey {
    StateKey::new(
        KeyKind::Application,
        format!("service:{service_id}/user_key:{user_key}/id"),
    )
}

pub fn user_key_version(service_id: &str, user_key: &str) -> StateKey {
    StateKey::new(
        KeyKind::Application,
        format!("service:{service_id}/user_key:{user_key}/version"),
    )
}

pub fn user(service_id: &ServiceId, username: &str) -> StateKey {
    StateKey::new(KeyKind::User, format!("service:{service_id}/name:{username}"))
}

pub fn user_version(service_id: &str, username: &str) -> StateKey {
    StateKey::new(
        KeyKind::User,
        format!("service:{service_id}/name:{username}/version"),
    )
}

pub fn access_token(service_id: &ServiceId, token: &str) -> StateKey {
    StateKey::new(
        KeyKind::AccessToken,
        format!("service:{service_id}/token:{token}"),
    )
}

/// Counter of an application's usage of one metric in the period
/// instance containing `now`.
pub fn application_usage(
    service_id: &ServiceId,
    application_id: &ApplicationId,
    metric_id: &MetricId,
    period: Period,
    now: &DateTime<Utc>,
) -> StateKey {
    StateKey::new(
        KeyKind::Usage,
        format!(
            "service:{service_id}/application:{application_id}/metric:{metric_id}/{}",
            period.key_segment(now)
        ),
    )
}

pub fn user_usage(
    service_id: &ServiceId,
    username: &str,
    metric_id: &MetricId,
    period: Period,
    now: &DateTime<Utc>,
) -> StateKey {
    StateKey::new(
        KeyKind::Usage,
        format!(
            "service:{service_id}/user:{username}/metric:{metric_id}/{}",
            period.key_segment(now)
        ),
    )
}

/// Cached status document for an application identity variant.
pub fn application_status(service_id: &str, identity: &str) -> StateKey {
    StateKey::new(
        KeyKind::Cache,
        format!("service:{service_id}/application:{identity}"),
    )
}

pub fn user_status(service_id: &str, username: &str) -> StateKey {
    StateKey::new(KeyKind::Cache, format!("service:{service_id}/user:{username}"))
}

/// Global toggle for the authorization cache.
pub fn caching_enabled() -> StateKey {
    StateKey::new(KeyKind::Settings, "caching_enabled")
}

/// Set of status keys whose last written document was a denial.
pub fn limit_violations() -> StateKey {
    StateKey::new(KeyKind::Index, "limit_violations")
}
