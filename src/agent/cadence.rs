//! Cadence: recurrence rules
//!
//! A cadence is anything that can answer "when is the next fire strictly
//! after this instant". Two concrete representations are supported:
//! - Fixed intervals (`every 4 hours`, `every 5 minutes`, `30m`, `1d`)
//! - Five-field cron expressions (`*/5 * * * *`, `0 */4 * * *`) and the
//!   `@hourly` / `@daily` / `@weekly` macros
//!
//! Both evaluate in UTC.

use chrono::{DateTime, Duration, Utc};
use croner::Cron;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Fires further out than this are treated as never
const CRON_SEARCH_DAYS: i64 = 366 * 5;

/// Cadence parse errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CadenceError {
    #[error("empty cadence expression")]
    Empty,
    #[error("interval must be greater than zero: {0}")]
    ZeroInterval(String),
    #[error("invalid interval: {0}")]
    InvalidInterval(String),
    #[error("unknown interval unit: {0}")]
    UnknownUnit(String),
    #[error("interval must be whole seconds: {0}ms")]
    SubSecondInterval(i64),
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },
    #[error("cron expression needs 5 fields, got {0}")]
    FieldCount(usize),
}

/// Next-fire computation
pub trait NextFire {
    /// First fire time strictly after `after`, or `None` if the rule never fires again
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// A parsed recurrence rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Cadence {
    /// Fire every fixed interval
    Interval(Duration),
    /// Fire on matching wall-clock minutes
    Cron(CronExpr),
}

impl Cadence {
    /// Fixed interval helper; see [`Cadence::validate`] for what can actually fire
    pub fn every(interval: Duration) -> Self {
        Self::Interval(interval)
    }

    /// Intervals must be a positive whole number of seconds
    pub fn validate(&self) -> Result<(), CadenceError> {
        match self {
            Self::Interval(d) if *d <= Duration::zero() => {
                Err(CadenceError::ZeroInterval(format!("{}s", d.num_seconds())))
            }
            Self::Interval(d) if d.subsec_nanos() != 0 => {
                Err(CadenceError::SubSecondInterval(d.num_milliseconds()))
            }
            _ => Ok(()),
        }
    }

    /// Interval length, for interval cadences only
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Interval(d) => Some(*d),
            Self::Cron(_) => None,
        }
    }

    /// Stretch or shrink an interval cadence by `factor`, clamped to `[min, max]`.
    ///
    /// Cron cadences have no meaningful scale and return `None`.
    pub fn scaled(&self, factor: f64, min: Duration, max: Duration) -> Option<Cadence> {
        let interval = self.interval()?;
        let secs = (interval.num_seconds() as f64 * factor).round() as i64;
        let secs = secs.clamp(min.num_seconds().max(1), max.num_seconds().max(1));
        Some(Self::Interval(Duration::seconds(secs)))
    }
}

impl NextFire for Cadence {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval(d) => {
                self.validate().ok()?;
                after.checked_add_signed(*d)
            }
            Self::Cron(expr) => expr.next_after(after),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval(d) => {
                let secs = d.num_seconds();
                if secs % 86400 == 0 {
                    write!(f, "every {} days", secs / 86400)
                } else if secs % 3600 == 0 {
                    write!(f, "every {} hours", secs / 3600)
                } else if secs % 60 == 0 {
                    write!(f, "every {} minutes", secs / 60)
                } else {
                    write!(f, "every {} seconds", secs)
                }
            }
            Self::Cron(expr) => write!(f, "{}", expr.source),
        }
    }
}

impl FromStr for Cadence {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CadenceError::Empty);
        }

        let lower = trimmed.to_ascii_lowercase();
        let expanded = match lower.as_str() {
            "@hourly" => Some("0 * * * *"),
            "@daily" | "@midnight" => Some("0 0 * * *"),
            "@weekly" => Some("0 0 * * 0"),
            _ => None,
        };
        if let Some(expr) = expanded {
            return CronExpr::parse(expr).map(Self::Cron);
        }

        if let Some(rest) = lower.strip_prefix("every ") {
            return parse_interval(rest);
        }

        if trimmed.split_whitespace().count() > 1 {
            return CronExpr::parse(trimmed).map(Self::Cron);
        }

        parse_interval(&lower)
    }
}

impl TryFrom<String> for Cadence {
    type Error = CadenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cadence> for String {
    fn from(value: Cadence) -> Self {
        value.to_string()
    }
}

/// Parse `4 hours`, `4h`, `hour`, `90s`
fn parse_interval(spec: &str) -> Result<Cadence, CadenceError> {
    let spec = spec.trim();
    let (count, unit) = match spec.find(|c: char| !c.is_ascii_digit()) {
        Some(0) => ("1", spec),
        Some(idx) => (&spec[..idx], spec[idx..].trim()),
        None => return Err(CadenceError::InvalidInterval(spec.to_string())),
    };

    let count: i64 = count
        .parse()
        .map_err(|_| CadenceError::InvalidInterval(spec.to_string()))?;
    if count == 0 {
        return Err(CadenceError::ZeroInterval(spec.to_string()));
    }

    let unit_secs: i64 = match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
        "d" | "day" | "days" => 86400,
        other => return Err(CadenceError::UnknownUnit(other.to_string())),
    };

    let secs = count
        .checked_mul(unit_secs)
        .ok_or_else(|| CadenceError::InvalidInterval(spec.to_string()))?;
    Duration::try_seconds(secs)
        .map(Cadence::Interval)
        .ok_or_else(|| CadenceError::InvalidInterval(spec.to_string()))
}

/// Five-field cron expression: minute hour day-of-month month day-of-week
#[derive(Clone)]
pub struct CronExpr {
    source: String,
    cron: Arc<Cron>,
}

impl CronExpr {
    /// Parse a standard five-field expression
    pub fn parse(expr: &str) -> Result<Self, CadenceError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CadenceError::FieldCount(fields.len()));
        }

        let source = fields.join(" ");
        let cron = source
            .parse::<Cron>()
            .map_err(|e| CadenceError::InvalidCron {
                expr: source.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            source,
            cron: Arc::new(cron),
        })
    }

    /// Original expression text
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl NextFire for CronExpr {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = self.cron.find_next_occurrence(&after, false).ok()?;
        let within = after
            .checked_add_signed(Duration::days(CRON_SEARCH_DAYS))
            .map_or(true, |limit| next <= limit);
        within.then_some(next)
    }
}

impl PartialEq for CronExpr {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for CronExpr {}

impl fmt::Debug for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpr").field(&self.source).finish()
    }
}
