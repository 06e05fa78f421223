use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UsageValueInvalid;

/// A single requested usage quantity for one metric.
///
/// Usage is normally incremental. A value written as `#N` on the wire sets
/// the counter to the absolute value `N` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageValue {
    Increment(i64),
    Set(i64),
}

impl UsageValue {
    /// The increment carried by this value, or zero for an absolute set.
    #[must_use]
    pub fn increment(&self) -> i64 {
        match self {
            Self::Increment(n) => *n,
            Self::Set(_) => 0,
        }
    }

    /// The absolute value carried by this value, if it is a set.
    #[must_use]
    pub fn absolute(&self) -> Option<i64> {
        match self {
            Self::Increment(_) => None,
            Self::Set(v) => Some(*v),
        }
    }

    /// Value a counter holds after applying this usage to `current`.
    #[must_use]
    pub fn apply_to(&self, current: i64) -> i64 {
        match self {
            Self::Increment(n) => current.saturating_add(*n),
            Self::Set(v) => *v,
        }
    }
}

impl FromStr for UsageValue {
    type Err = UsageValueInvalid;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (raw, absolute) = match trimmed.strip_prefix('#') {
            Some(rest) => (rest.trim(), true),
            None => (trimmed, false),
        };
        let value: i64 = raw
            .parse()
            .map_err(|_| UsageValueInvalid(s.to_owned()))?;
        Ok(if absolute {
            Self::Set(value)
        } else {
            Self::Increment(value)
        })
    }
}

impl std::fmt::Display for UsageValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Increment(n) => write!(f, "{n}"),
            Self::Set(v) => write!(f, "#{v}"),
        }
    }
}

/// Requested usage keyed by metric name.
///
/// Ordered so that anything derived from the metric names is deterministic.
pub type Usage = BTreeMap<String, UsageValue>;

/// Parse a raw `metric -> quantity` map as received from a request.
pub fn parse_usage<'a, I>(raw: I) -> Result<Usage, UsageValueInvalid>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    raw.into_iter()
        .map(|(metric, value)| Ok((metric.to_owned(), value.parse()?)))
        .collect()
}
