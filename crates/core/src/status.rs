use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::period::Period;
use crate::types::{ApplicationId, MetricId, ServiceId};
use crate::usage::Usage;

/// Why an authorization was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    ApplicationNotActive,
    UserNotActive,
    ApplicationKeyInvalid,
    ReferrerNotAllowed,
    RedirectUrlInvalid,
    MetricInvalid,
    LimitsExceeded,
}

impl RejectionReason {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ApplicationNotActive => "application_not_active",
            Self::UserNotActive => "user_not_active",
            Self::ApplicationKeyInvalid => "application_key_invalid",
            Self::ReferrerNotAllowed => "referrer_not_allowed",
            Self::RedirectUrlInvalid => "redirect_url_invalid",
            Self::MetricInvalid => "metric_invalid",
            Self::LimitsExceeded => "limits_exceeded",
        }
    }

    /// Human-readable explanation.
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::ApplicationNotActive => "application is not active",
            Self::UserNotActive => "user is not active",
            Self::ApplicationKeyInvalid => "application key is missing or invalid",
            Self::ReferrerNotAllowed => "referrer is not allowed",
            Self::RedirectUrlInvalid => "redirect url does not match",
            Self::MetricInvalid => "usage refers to an unknown metric",
            Self::LimitsExceeded => "usage limits are exceeded",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Current usage of one metric against one of its limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub metric_id: MetricId,
    pub metric_name: String,
    pub period: Period,
    pub period_start: DateTime<Utc>,
    pub current_value: i64,
    pub max_value: i64,
}

impl UsageReport {
    #[must_use]
    pub fn is_exceeded(&self) -> bool {
        self.current_value > self.max_value
    }
}

/// A stored (or returned) authorization decision with its usage snapshot.
///
/// Application-level documents carry `application_usage`; user-level
/// documents carry `user_usage`. Merging both yields the full view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDocument {
    pub authorized: bool,
    #[serde(default)]
    pub reason: Option<RejectionReason>,
    pub application_id: ApplicationId,
    /// Whether the decision involved an end user.
    #[serde(default)]
    pub user_scoped: bool,
    #[serde(default)]
    pub application_usage: Vec<UsageReport>,
    #[serde(default)]
    pub user_usage: Vec<UsageReport>,
}

impl StatusDocument {
    /// Every usage report, application segment first.
    pub fn usage_reports(&self) -> impl Iterator<Item = &UsageReport> {
        self.application_usage.iter().chain(self.user_usage.iter())
    }
}

/// Outcome of a full validation run.
///
/// Validators mark the status rejected; the first reason recorded wins and
/// later validators still run so every usage row is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub service_id: ServiceId,
    pub application_id: ApplicationId,
    pub user_id: Option<String>,
    pub application_usage: Vec<UsageReport>,
    pub user_usage: Vec<UsageReport>,
    /// Usage being reported together with this authorization, if any.
    pub usage: Option<Usage>,
    authorized: bool,
    reason: Option<RejectionReason>,
}

impl Status {
    #[must_use]
    pub fn new(
        service_id: ServiceId,
        application_id: ApplicationId,
        user_id: Option<String>,
        application_usage: Vec<UsageReport>,
        user_usage: Vec<UsageReport>,
    ) -> Self {
        Self {
            service_id,
            application_id,
            user_id,
            application_usage,
            user_usage,
            usage: None,
            authorized: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    #[must_use]
    pub fn reason(&self) -> Option<RejectionReason> {
        self.reason
    }

    /// Deny the request. Only the first reason is kept.
    pub fn reject(&mut self, reason: RejectionReason) {
        if self.authorized {
            self.authorized = false;
            self.reason = Some(reason);
        }
    }

    /// Render the decision as a document.
    ///
    /// When the status is authorized and carries reported usage, the usage is
    /// folded into the current values so the document reflects the state
    /// after recording.
    #[must_use]
    pub fn to_document(&self) -> StatusDocument {
        StatusDocument {
            authorized: self.authorized,
            reason: self.reason,
            application_id: self.application_id.clone(),
            user_scoped: self.user_id.is_some(),
            application_usage: self.rendered(&self.application_usage),
            user_usage: self.rendered(&self.user_usage),
        }
    }

    fn rendered(&self, reports: &[UsageReport]) -> Vec<UsageReport> {
        let pending = self.usage.as_ref().filter(|_| self.authorized);
        reports
            .iter()
            .map(|report| {
                let mut report = report.clone();
                if let Some(value) = pending.and_then(|u| u.get(&report.metric_name)) {
                    report.current_value = value.apply_to(report.current_value);
                }
                report
            })
            .collect()
    }
}
