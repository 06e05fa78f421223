use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Time window over which a usage limit is enforced.
///
/// Periods are calendar-aligned in UTC: a `Day` starts at midnight, a `Week`
/// on Monday, a `Month` on the first day. `Eternity` never resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
    Eternity,
}

impl Period {
    /// Every period, from the finest to the coarsest.
    pub const ALL: [Period; 7] = [
        Period::Minute,
        Period::Hour,
        Period::Day,
        Period::Week,
        Period::Month,
        Period::Year,
        Period::Eternity,
    ];

    /// Return a short label used in storage keys and responses.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
            Self::Eternity => "eternity",
        }
    }

    /// Compute the start of the period containing `now`.
    #[must_use]
    pub fn start(&self, now: &DateTime<Utc>) -> DateTime<Utc> {
        let date = now.date_naive();
        match self {
            Self::Minute => at(date, now.hour(), now.minute()),
            Self::Hour => at(date, now.hour(), 0),
            Self::Day => at(date, 0, 0),
            Self::Week => {
                let back = chrono::Duration::days(i64::from(now.weekday().num_days_from_monday()));
                at(date - back, 0, 0)
            }
            Self::Month => at(date.with_day(1).unwrap_or(date), 0, 0),
            Self::Year => at(
                NaiveDate::from_ymd_opt(now.year(), 1, 1).unwrap_or(date),
                0,
                0,
            ),
            Self::Eternity => DateTime::UNIX_EPOCH,
        }
    }

    /// Build the key segment identifying the period instance containing `now`.
    ///
    /// Format: `{label}:{stamp}` (e.g. `day:20100510`), or just `eternity`.
    #[must_use]
    pub fn key_segment(&self, now: &DateTime<Utc>) -> String {
        let start = self.start(now);
        let stamp = match self {
            Self::Minute => start.format("%Y%m%d%H%M").to_string(),
            Self::Hour => start.format("%Y%m%d%H").to_string(),
            Self::Day | Self::Week | Self::Month | Self::Year => start.format("%Y%m%d").to_string(),
            Self::Eternity => return self.as_str().to_owned(),
        };
        format!("{}:{stamp}", self.as_str())
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    date.and_hms_opt(hour, minute, 0)
        .unwrap_or_default()
        .and_utc()
}
