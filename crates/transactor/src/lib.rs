//! Authorization decision pipeline for tollgate.
//!
//! The [`Transactor`] decides whether API calls are within their limits and
//! hands accepted usage to a [`ReportQueue`]. Decisions are cached per
//! request combination: entity version vectors tell whether a cached status
//! document is still trustworthy, and the document is patched with each
//! request's usage until it expires or a limit crossing forces a full
//! validation.

pub mod builder;
pub mod combination;
pub mod config;
pub mod entities;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod notify;
pub mod queue;
pub mod recorder;
pub mod service_cache;
pub mod status_cache;
pub mod transactor;
pub mod usage;
pub mod validators;

pub use builder::TransactorBuilder;
pub use combination::{CombinationCache, CombinationCheck};
pub use config::{CachingConfig, NotificationConfig, TransactorConfig};
pub use entities::{EntityRepository, TokenCredentials};
pub use error::TransactorError;
pub use metrics::{MetricsSnapshot, TransactorMetrics};
pub use notify::{NotifyBatch, NotifyBatcher, Notifier, RecordingNotifier};
pub use queue::{ChannelReportQueue, MemoryReportQueue, QueueError, ReportQueue};
pub use recorder::UsageRecorder;
pub use service_cache::ServiceIdCache;
pub use status_cache::{CacheEntity, CacheScope, PatchOptions, PatchOutcome, StatusCache};
pub use transactor::{Decision, DecisionSource, Transactor, Utilization};
pub use usage::UsageSnapshot;
