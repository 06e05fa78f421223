use thiserror::Error;

/// Failure to resolve the entities a request refers to.
///
/// These are fatal for the request and surfaced to the caller. Quota and
/// state denials are not errors; see [`RejectionReason`](crate::RejectionReason).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("provider key \"{0}\" is invalid")]
    ProviderKeyInvalid(String),

    #[error("service id \"{0}\" is invalid")]
    ServiceIdInvalid(String),

    #[error("application with id=\"{}\" was not found", .0.as_deref().unwrap_or(""))]
    ApplicationNotFound(Option<String>),

    #[error("user key \"{0}\" is invalid")]
    UserKeyInvalid(String),

    #[error("application with id=\"{0}\" requires a user, but none was given")]
    UserNotDefined(String),

    #[error("user \"{user_id}\" requires registration to use service \"{service_id}\"")]
    UserRequiresRegistration { service_id: String, user_id: String },

    #[error("access token \"{0}\" is invalid")]
    AccessTokenInvalid(String),
}

impl ResolutionError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProviderKeyInvalid(_) => "provider_key_invalid",
            Self::ServiceIdInvalid(_) => "service_id_invalid",
            Self::ApplicationNotFound(_) => "application_not_found",
            Self::UserKeyInvalid(_) => "user_key_invalid",
            Self::UserNotDefined(_) => "user_not_defined",
            Self::UserRequiresRegistration { .. } => "user_requires_registration",
            Self::AccessTokenInvalid(_) => "access_token_invalid",
        }
    }
}

/// A usage quantity that is neither an integer nor `#`-prefixed integer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("usage value \"{0}\" is invalid")]
pub struct UsageValueInvalid(pub String);
