use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::usage::Usage;

/// The authorization entry point a request came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthAction {
    Authorize,
    Authrep,
    OAuthAuthorize,
    OAuthAuthrep,
}

impl AuthAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::Authrep => "authrep",
            Self::OAuthAuthorize => "oauth_authorize",
            Self::OAuthAuthrep => "oauth_authrep",
        }
    }

    #[must_use]
    pub fn is_oauth(&self) -> bool {
        matches!(self, Self::OAuthAuthorize | Self::OAuthAuthrep)
    }

    /// Whether the action records the requested usage on success.
    #[must_use]
    pub fn reports_usage(&self) -> bool {
        matches!(self, Self::Authrep | Self::OAuthAuthrep)
    }
}

impl std::fmt::Display for AuthAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifying parameters and usage of an authorization request.
///
/// Empty strings are treated the same as absent values throughout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthParams {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub app_key: Option<String>,
    #[serde(default)]
    pub user_key: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub log: Option<HashMap<String, String>>,
}

impl AuthParams {
    /// Parameters identifying an application by id.
    #[must_use]
    pub fn for_app(app_id: impl Into<String>) -> Self {
        Self {
            app_id: Some(app_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    #[must_use]
    pub fn service_id(&self) -> Option<&str> {
        non_empty(self.service_id.as_deref())
    }

    #[must_use]
    pub fn app_id(&self) -> Option<&str> {
        non_empty(self.app_id.as_deref())
    }

    #[must_use]
    pub fn app_key(&self) -> Option<&str> {
        non_empty(self.app_key.as_deref())
    }

    #[must_use]
    pub fn user_key(&self) -> Option<&str> {
        non_empty(self.user_key.as_deref())
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        non_empty(self.user_id.as_deref())
    }

    #[must_use]
    pub fn referrer(&self) -> Option<&str> {
        non_empty(self.referrer.as_deref())
    }

    #[must_use]
    pub fn redirect_url(&self) -> Option<&str> {
        non_empty(self.redirect_url.as_deref())
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        non_empty(self.access_token.as_deref())
    }

    /// Whether the request carries usage worth recording.
    #[must_use]
    pub fn has_usage(&self) -> bool {
        self.usage.as_ref().is_some_and(|u| !u.is_empty())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
