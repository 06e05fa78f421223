pub mod entity;
pub mod error;
pub mod period;
pub mod request;
pub mod status;
pub mod transaction;
pub mod types;
pub mod usage;

pub use entity::{Application, EntityState, Metric, Service, UsageLimit, User};
pub use error::{ResolutionError, UsageValueInvalid};
pub use period::Period;
pub use request::{AuthAction, AuthParams};
pub use status::{RejectionReason, Status, StatusDocument, UsageReport};
pub use transaction::{ReportJob, Transaction};
pub use types::{ApplicationId, MetricId, ServiceId};
pub use usage::{Usage, UsageValue, parse_usage};
