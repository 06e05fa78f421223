use chrono::{DateTime, Utc};

use tollgate_core::{Application, Service, UsageLimit, UsageReport, User};
use tollgate_state::{StateKey, StateStore};

use crate::error::TransactorError;
use crate::keys;

/// Current usage of an application and, optionally, one of its users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub application: Vec<UsageReport>,
    pub user: Vec<UsageReport>,
}

fn report(
    service: &Service,
    limit: &UsageLimit,
    value: Option<&str>,
    now: &DateTime<Utc>,
) -> UsageReport {
    UsageReport {
        metric_id: limit.metric_id.clone(),
        metric_name: service
            .metric_name(&limit.metric_id)
            .unwrap_or(limit.metric_id.as_str())
            .to_owned(),
        period: limit.period,
        period_start: limit.period.start(now),
        current_value: value.and_then(|v| v.parse().ok()).unwrap_or(0),
        max_value: limit.max_value,
    }
}

/// Read the counters behind every usage limit of `application` (and
/// `user`) in a single snapshot.
pub async fn load_usage(
    store: &dyn StateStore,
    service: &Service,
    application: &Application,
    user: Option<&User>,
    now: &DateTime<Utc>,
) -> Result<UsageSnapshot, TransactorError> {
    let user_limits: &[UsageLimit] = user
        .map(|u| u.usage_limits.as_slice())
        .unwrap_or_default();

    let mut read: Vec<StateKey> =
        Vec::with_capacity(application.usage_limits.len() + user_limits.len());
    for limit in &application.usage_limits {
        read.push(keys::application_usage(
            &application.service_id,
            &application.id,
            &limit.metric_id,
            limit.period,
            now,
        ));
    }
    if let Some(user) = user {
        for limit in user_limits {
            read.push(keys::user_usage(
                &user.service_id,
                &user.username,
                &limit.metric_id,
                limit.period,
                now,
            ));
        }
    }
    if read.is_empty() {
        return Ok(UsageSnapshot::default());
    }

    let values = store.get_many(&read).await?;
    let (app_values, user_values) = values.split_at(application.usage_limits.len());

    Ok(UsageSnapshot {
        application: application
            .usage_limits
            .iter()
            .zip(app_values)
            .map(|(limit, value)| report(service, limit, value.as_deref(), now))
            .collect(),
        user: user_limits
            .iter()
            .zip(user_values)
            .map(|(limit, value)| report(service, limit, value.as_deref(), now))
            .collect(),
    })
}
