use serde::{Deserialize, Serialize};

use crate::period::Period;
use crate::types::{ApplicationId, MetricId, ServiceId};

/// A metric defined on a service (e.g. `hits`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub id: MetricId,
    pub name: String,
}

impl Metric {
    #[must_use]
    pub fn new(id: impl Into<MetricId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Maximum usage of one metric within one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLimit {
    pub metric_id: MetricId,
    pub period: Period,
    pub max_value: i64,
}

impl UsageLimit {
    #[must_use]
    pub fn new(metric_id: impl Into<MetricId>, period: Period, max_value: i64) -> Self {
        Self {
            metric_id: metric_id.into(),
            period,
            max_value,
        }
    }
}

/// Lifecycle state shared by applications and users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    #[default]
    Active,
    Suspended,
}

/// An API service owned by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub provider_key: String,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    /// When set, unknown users are not created on first use.
    #[serde(default)]
    pub user_registration_required: bool,
    /// Limits given to users created on first use.
    #[serde(default)]
    pub default_user_limits: Vec<UsageLimit>,
    /// Monotonic version, maintained by the repository. Not serialized.
    #[serde(skip)]
    pub version: u64,
}

impl Service {
    #[must_use]
    pub fn new(id: impl Into<ServiceId>, provider_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider_key: provider_key.into(),
            metrics: Vec::new(),
            user_registration_required: false,
            default_user_limits: Vec::new(),
            version: 0,
        }
    }

    #[must_use]
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Look up a metric by its name.
    #[must_use]
    pub fn metric_by_name(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Name of the metric with the given id, if defined.
    #[must_use]
    pub fn metric_name(&self, id: &MetricId) -> Option<&str> {
        self.metrics
            .iter()
            .find(|m| &m.id == id)
            .map(|m| m.name.as_str())
    }
}

/// A consumer application registered on a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub service_id: ServiceId,
    pub id: ApplicationId,
    #[serde(default)]
    pub state: EntityState,
    /// Single-credential lookup key, an alternative to `id` + app key.
    #[serde(default)]
    pub user_key: Option<String>,
    /// Application keys; when non-empty one of them must be presented.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Allowed referrer patterns; `*` matches any run of characters.
    #[serde(default)]
    pub referrer_filters: Vec<String>,
    #[serde(default)]
    pub redirect_url: Option<String>,
    /// Whether every request must identify an end user.
    #[serde(default)]
    pub user_required: bool,
    #[serde(default)]
    pub usage_limits: Vec<UsageLimit>,
    #[serde(skip)]
    pub version: u64,
}

impl Application {
    #[must_use]
    pub fn new(service_id: impl Into<ServiceId>, id: impl Into<ApplicationId>) -> Self {
        Self {
            service_id: service_id.into(),
            id: id.into(),
            state: EntityState::Active,
            user_key: None,
            keys: Vec::new(),
            referrer_filters: Vec::new(),
            redirect_url: None,
            user_required: false,
            usage_limits: Vec::new(),
            version: 0,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    #[must_use]
    pub fn with_referrer_filter(mut self, filter: impl Into<String>) -> Self {
        self.referrer_filters.push(filter.into());
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: UsageLimit) -> Self {
        self.usage_limits.push(limit);
        self
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == EntityState::Active
    }

    #[must_use]
    pub fn has_key(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

/// An end user of an application, tracked per service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub service_id: ServiceId,
    pub username: String,
    #[serde(default)]
    pub state: EntityState,
    #[serde(default)]
    pub usage_limits: Vec<UsageLimit>,
    #[serde(skip)]
    pub version: u64,
}

impl User {
    #[must_use]
    pub fn new(service_id: impl Into<ServiceId>, username: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            username: username.into(),
            state: EntityState::Active,
            usage_limits: Vec::new(),
            version: 0,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == EntityState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_serialized() {
        let mut app = Application::new("1", "app").with_key("k1");
        app.version = 7;
        let json = serde_json::to_string(&app).unwrap();
        assert!(!json.contains("version"));
        let back: Application = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, 0);
        assert_eq!(back.keys, vec!["k1".to_owned()]);
    }

    #[test]
    fn metric_lookup() {
        let service = Service::new("1", "pk").with_metric(Metric::new("m1", "hits"));
        assert_eq!(service.metric_by_name("hits").unwrap().id.as_str(), "m1");
        assert_eq!(service.metric_name(&MetricId::new("m1")), Some("hits"));
        assert!(service.metric_by_name("bytes").is_none());
    }

    #[test]
    fn state_defaults_to_active() {
        let user: User = serde_json::from_str(r#"{"service_id":"1","username":"bob"}"#).unwrap();
        assert!(user.is_active());
    }
}
