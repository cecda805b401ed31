//! Watermark definitions bounding work-item generation.
//!
//! A DATETIME watermark carries a half-open `[from, to)` instant pair; a
//! UNIT watermark carries an ordered list of partition-key records. At
//! most one of each may be active per plan.

use std::sync::LazyLock;

use chrono::{DateTime, DurationRound, NaiveDate, TimeDelta, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^P(\d+)D(?:T(\d+)H)?$").expect("valid duration regex"));

/// Errors raised while parsing or resolving watermark bounds.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WatermarkError {
    #[error("unrecognized time anchor: {0:?}")]
    InvalidAnchor(String),
    #[error("watermark arithmetic failed: {0}")]
    Arithmetic(String),
}

/// One bound of a datetime watermark range.
///
/// Accepted forms: the literal `now` (or its `-` shorthand), an
/// ISO date (`2024-01-01`), an RFC-3339 datetime, or an ISO-8601 day/hour
/// duration (`P3D`, `P1DT6H`) meaning "now minus the duration". Day-only
/// durations are floored to midnight, durations with an hour component to
/// the hour, so repeated plans within the same period agree on bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeAnchor {
    Now,
    Literal(DateTime<Utc>),
    Lookback { days: u32, hours: u32 },
}

impl TimeAnchor {
    /// Parse an anchor from its configuration string.
    ///
    /// # Errors
    ///
    /// Returns [`WatermarkError::InvalidAnchor`] when the string matches
    /// none of the accepted forms.
    pub fn parse(input: &str) -> Result<Self, WatermarkError> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("now") || trimmed == "-" {
            return Ok(Self::Now);
        }
        if let Some(caps) = DURATION_RE.captures(trimmed) {
            let days = caps[1]
                .parse::<u32>()
                .map_err(|_| WatermarkError::InvalidAnchor(input.to_string()))?;
            let hours = caps
                .get(2)
                .map(|m| m.as_str().parse::<u32>())
                .transpose()
                .map_err(|_| WatermarkError::InvalidAnchor(input.to_string()))?
                .unwrap_or(0);
            return Ok(Self::Lookback { days, hours });
        }
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            let midnight = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| WatermarkError::InvalidAnchor(input.to_string()))?;
            return Ok(Self::Literal(midnight.and_utc()));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::Literal(dt.with_timezone(&Utc)));
        }
        Err(WatermarkError::InvalidAnchor(input.to_string()))
    }

    /// Resolve the anchor against the plan's `now` instant.
    ///
    /// # Errors
    ///
    /// Returns [`WatermarkError::Arithmetic`] if flooring overflows.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, WatermarkError> {
        match self {
            Self::Now => Ok(now),
            Self::Literal(dt) => Ok(*dt),
            Self::Lookback { days, hours } => {
                let unit = if *hours == 0 {
                    TimeDelta::days(1)
                } else {
                    TimeDelta::hours(1)
                };
                let floored = now
                    .duration_trunc(unit)
                    .map_err(|e| WatermarkError::Arithmetic(e.to_string()))?;
                Ok(floored
                    - TimeDelta::days(i64::from(*days))
                    - TimeDelta::hours(i64::from(*hours)))
            }
        }
    }
}

/// The two watermark kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkSpec {
    Datetime { from: TimeAnchor, to: TimeAnchor },
    Unit { units: Vec<serde_json::Value> },
}

/// A named watermark declaration, parsed from configuration or built from
/// externally supplied activation records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkDefinition {
    pub name: String,
    pub spec: WatermarkSpec,
}

impl WatermarkDefinition {
    /// Build a datetime watermark from configuration strings.
    ///
    /// # Errors
    ///
    /// Returns [`WatermarkError::InvalidAnchor`] when either bound fails
    /// to parse.
    pub fn datetime(
        name: impl Into<String>,
        from: &str,
        to: &str,
    ) -> Result<Self, WatermarkError> {
        Ok(Self {
            name: name.into(),
            spec: WatermarkSpec::Datetime {
                from: TimeAnchor::parse(from)?,
                to: TimeAnchor::parse(to)?,
            },
        })
    }

    /// Build a unit watermark from a comma-separated value list. Each
    /// entry becomes a `{<name>: <value>}` record.
    pub fn unit_from_list(name: impl Into<String>, list: &str) -> Self {
        let name = name.into();
        let units = list
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| serde_json::json!({ name.clone(): v }))
            .collect();
        Self {
            name,
            spec: WatermarkSpec::Unit { units },
        }
    }

    /// Build a unit watermark from pre-built records (e.g. activation
    /// secondary input).
    pub fn unit_from_records(name: impl Into<String>, records: Vec<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            spec: WatermarkSpec::Unit { units: records },
        }
    }

    #[must_use]
    pub fn is_datetime(&self) -> bool {
        matches!(self.spec, WatermarkSpec::Datetime { .. })
    }

    #[must_use]
    pub fn is_unit(&self) -> bool {
        matches!(self.spec, WatermarkSpec::Unit { .. })
    }

    /// Resolve the datetime range against `now`; `None` for unit
    /// watermarks.
    ///
    /// # Errors
    ///
    /// Returns [`WatermarkError`] when a bound cannot be resolved.
    pub fn range(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, WatermarkError> {
        match &self.spec {
            WatermarkSpec::Datetime { from, to } => {
                Ok(Some((from.resolve(now)?, to.resolve(now)?)))
            }
            WatermarkSpec::Unit { .. } => Ok(None),
        }
    }

    /// The unit records in declaration order; empty for datetime
    /// watermarks.
    #[must_use]
    pub fn units(&self) -> &[serde_json::Value] {
        match &self.spec {
            WatermarkSpec::Unit { units } => units,
            WatermarkSpec::Datetime { .. } => &[],
        }
    }

    /// Fully-qualified name used in work-item signatures.
    #[must_use]
    pub fn long_name(&self) -> String {
        format!("watermark.{}", self.name)
    }
}
