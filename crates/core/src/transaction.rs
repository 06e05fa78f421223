use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ApplicationId, ServiceId};
use crate::usage::Usage;

/// One usage record to be applied by the recording job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub application_id: Option<ApplicationId>,
    /// Alternative application lookup key when no id is known.
    #[serde(default)]
    pub user_key: Option<String>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub user_id: Option<String>,
    /// When the usage happened; the job's enqueue time when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Free-form request/response log attached by the caller.
    #[serde(default)]
    pub log: Option<HashMap<String, String>>,
}

impl Transaction {
    #[must_use]
    pub fn for_application(application_id: impl Into<ApplicationId>, usage: Usage) -> Self {
        Self {
            application_id: Some(application_id.into()),
            usage,
            ..Self::default()
        }
    }
}

/// A batch of transactions accepted for asynchronous recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportJob {
    pub service_id: ServiceId,
    pub transactions: Vec<Transaction>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ReportJob {
    #[must_use]
    pub fn new(
        service_id: ServiceId,
        transactions: Vec<Transaction>,
        context: HashMap<String, String>,
    ) -> Self {
        Self {
            service_id,
            transactions,
            enqueued_at: Utc::now(),
            context,
        }
    }
}
