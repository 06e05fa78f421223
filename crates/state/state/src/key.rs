use serde::{Deserialize, Serialize};

/// The kind of state being stored; the first segment of every key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// Cached authorization status documents.
    Cache,
    /// Version vectors recorded per request signature.
    Combination,
    /// Global runtime toggles.
    Settings,
    /// Sets and lookup indexes.
    Index,
    Service,
    Application,
    User,
    /// Per-metric, per-period usage counters.
    Usage,
    /// OAuth access token credentials.
    AccessToken,
    Custom(String),
}

impl KeyKind {
    /// Return a string representation of the key kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Cache => "cache",
            Self::Combination => "cache_combination",
            Self::Settings => "settings",
            Self::Index => "index",
            Self::Service => "service",
            Self::Application => "application",
            Self::User => "user",
            Self::Usage => "usage",
            Self::AccessToken => "access_token",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key used to address entries in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub kind: KeyKind,
    pub id: String,
}

impl StateKey {
    /// Create a new state key.
    #[must_use]
    pub fn new(kind: KeyKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Return a canonical string representation: `kind/id`
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}/{}", self.kind, self.id)
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}
