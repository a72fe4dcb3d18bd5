use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::Serialize;

/// A named reporting period, resolved against a reference instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodKey {
    Today,
    Yesterday,
    Last7Days,
    Last30Days,
}

/// An inclusive datetime range derived from a [`PeriodKey`]. Transient —
/// computed per invocation, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
}

impl PeriodKey {
    /// Parse a period key string.
    ///
    /// Supported keys: `today`, `yesterday`, `last7days`, `last30days`
    /// (case-insensitive). Anything else falls back to `today` — the
    /// scheduler treats an unrecognized key as "report on the current day"
    /// rather than failing the whole run.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "yesterday" => PeriodKey::Yesterday,
            "last7days" => PeriodKey::Last7Days,
            "last30days" => PeriodKey::Last30Days,
            _ => PeriodKey::Today,
        }
    }

    /// Canonical key string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKey::Today => "today",
            PeriodKey::Yesterday => "yesterday",
            PeriodKey::Last7Days => "last7days",
            PeriodKey::Last30Days => "last30days",
        }
    }

    /// Resolve the inclusive datetime range for this key, relative to `now`.
    ///
    /// Day boundaries are 00:00:00.000 and 23:59:59.999. Rolling windows
    /// include the current day, so `last7days` spans exactly 7 calendar days.
    pub fn range(&self, now: NaiveDateTime) -> DateRange {
        match self {
            PeriodKey::Today => DateRange {
                from: start_of_day(now),
                to: end_of_day(now),
            },
            PeriodKey::Yesterday => {
                let y = now - Duration::days(1);
                DateRange {
                    from: start_of_day(y),
                    to: end_of_day(y),
                }
            }
            PeriodKey::Last7Days => DateRange {
                from: start_of_day(now - Duration::days(6)),
                to: end_of_day(now),
            },
            PeriodKey::Last30Days => DateRange {
                from: start_of_day(now - Duration::days(29)),
                to: end_of_day(now),
            },
        }
    }
}

impl std::fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The period tag carried by a report definition (DAY/WEEK/MONTH).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodType {
    Day,
    Week,
    Month,
}

impl PeriodType {
    /// Parse the stored tag. Unknown tags resolve to `Day` so a misconfigured
    /// report still produces a current-day report instead of stalling the
    /// schedule.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "WEEK" => PeriodType::Week,
            "MONTH" => PeriodType::Month,
            _ => PeriodType::Day,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            PeriodType::Day => "DAY",
            PeriodType::Week => "WEEK",
            PeriodType::Month => "MONTH",
        }
    }

    /// The period key a scheduled report of this type covers.
    pub fn period_key(&self) -> PeriodKey {
        match self {
            PeriodType::Day => PeriodKey::Today,
            PeriodType::Week => PeriodKey::Last7Days,
            PeriodType::Month => PeriodKey::Last30Days,
        }
    }
}

fn start_of_day(dt: NaiveDateTime) -> NaiveDateTime {
    dt.date().and_time(NaiveTime::MIN)
}

fn end_of_day(dt: NaiveDateTime) -> NaiveDateTime {
    dt.date()
        .and_time(NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap())
}
