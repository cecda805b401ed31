//! Partition engine: breaks a datetime range into contiguous sub-ranges.
//!
//! Hourly and daily granularities step by fixed intervals; weekly steps
//! seven days; monthly and yearly use calendar arithmetic. The trailing
//! partial partition is emitted only when partial partitions are allowed.

use chrono::{DateTime, Months, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// A half-open `[start, end)` partition in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionRange {
    pub start_millis: i64,
    pub end_millis: i64,
}

impl PartitionRange {
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start_millis: start.timestamp_millis(),
            end_millis: end.timestamp_millis(),
        }
    }
}

/// Fixed partition granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    None,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Granularity {
    /// Parse a configuration string, case-insensitively.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        match input.to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "yearly" => Some(Self::Yearly),
            _ => None,
        }
    }

    /// The end of the partition starting at `start`, or `None` on
    /// calendar overflow.
    fn next(self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::None => None,
            Self::Hourly => start.checked_add_signed(TimeDelta::hours(1)),
            Self::Daily => start.checked_add_signed(TimeDelta::days(1)),
            Self::Weekly => start.checked_add_signed(TimeDelta::days(7)),
            Self::Monthly => start.checked_add_months(Months::new(1)),
            Self::Yearly => start.checked_add_months(Months::new(12)),
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        };
        f.write_str(name)
    }
}

/// One sub-range of a composite partition request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRange {
    pub granularity: Granularity,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// How a datetime range is broken into work-item partitions.
///
/// `Composite` concatenates each sub-range's partitions in the order
/// given; sub-ranges are not re-sorted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartitionPlan {
    Single(Granularity),
    Composite(Vec<SubRange>),
}

impl PartitionPlan {
    /// Partition `[start, end)` into contiguous, non-overlapping ranges.
    #[must_use]
    pub fn ranges(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        allow_partial: bool,
    ) -> Vec<PartitionRange> {
        match self {
            Self::Single(granularity) => stepped_ranges(*granularity, start, end, allow_partial),
            Self::Composite(subs) => {
                let mut out = Vec::new();
                for sub in subs {
                    let lo = sub.from.max(start);
                    let hi = sub.to.min(end);
                    if lo < hi {
                        out.extend(stepped_ranges(sub.granularity, lo, hi, allow_partial));
                    }
                }
                out
            }
        }
    }
}

fn stepped_ranges(
    granularity: Granularity,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    allow_partial: bool,
) -> Vec<PartitionRange> {
    if start >= end {
        return Vec::new();
    }
    if granularity == Granularity::None {
        return vec![PartitionRange::new(start, end)];
    }

    let mut out = Vec::new();
    let mut cursor = start;
    while cursor < end {
        match granularity.next(cursor) {
            Some(next) if next <= end => {
                out.push(PartitionRange::new(cursor, next));
                cursor = next;
            }
            _ => {
                if allow_partial {
                    out.push(PartitionRange::new(cursor, end));
                }
                break;
            }
        }
    }
    out
}
