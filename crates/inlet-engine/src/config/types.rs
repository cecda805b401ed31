//! Parsed, plan-scoped job configuration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use inlet_types::partition::{Granularity, PartitionPlan, SubRange};
use inlet_types::secondary::{RetryPolicy, SecondaryCategory};
use inlet_types::watermark::TimeAnchor;
use inlet_types::JobId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Declarative job configuration, parsed from YAML after environment
/// variable substitution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_version")]
    pub version: String,
    /// Job name; also the state-store key.
    pub job: String,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub watermarks: Vec<WatermarkConfig>,
    #[serde(default)]
    pub partition: PartitionConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Response field carrying the source's total record count. When set,
    /// pagination stops once the processed count reaches that value.
    #[serde(default)]
    pub total_count_field: Option<String>,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub secondary_inputs: Vec<SecondaryInputConfig>,
    #[serde(default)]
    pub full_load: FullLoadConfig,
    /// Drop work items whose narrowed range collapsed to zero width.
    #[serde(default = "default_true")]
    pub cleanse_zero_width: bool,
    /// Whether the source marks end-of-feed explicitly.
    #[serde(default)]
    pub explicit_eof: bool,
    #[serde(default)]
    pub schemas: SchemaConfig,
    #[serde(default)]
    pub state: StateConfig,
}

impl JobConfig {
    #[must_use]
    pub fn job_id(&self) -> JobId {
        JobId::new(self.job.clone())
    }

    /// Wait between consecutive calls on one connection.
    #[must_use]
    pub fn call_interval(&self) -> Duration {
        Duration::from_millis(self.limits.call_interval_millis)
    }

    /// Retry bounds of the authentication secondary input, defaults when
    /// no authentication input (or no retry block) is declared.
    #[must_use]
    pub fn authentication_retry(&self) -> RetryPolicy {
        self.secondary_inputs
            .iter()
            .find(|d| d.category == SecondaryCategory::Authentication)
            .map(|d| d.retry)
            .unwrap_or_default()
    }

    /// Whether an authentication secondary input is declared.
    #[must_use]
    pub fn authentication_declared(&self) -> bool {
        self.secondary_inputs
            .iter()
            .any(|d| d.category == SecondaryCategory::Authentication)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Work-item-scoped template (endpoint path, statement string, ...)
    /// resolved against dynamic parameters before each first call.
    #[serde(default)]
    pub template: Option<String>,
    /// Defined call parameters; string values may reference variables.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkKind {
    Datetime,
    Unit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: WatermarkKind,
    /// Half-open `[from, to)` bounds; datetime watermarks only.
    #[serde(default)]
    pub range: Option<RangeConfig>,
    /// Comma-separated partition keys; unit watermarks only.
    #[serde(default)]
    pub units: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeConfig {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// `none`, `hourly`, `daily`, `weekly`, `monthly`, `yearly`, or
    /// `composite`.
    #[serde(default = "default_granularity")]
    pub granularity: String,
    /// Allow a final partial partition.
    #[serde(default)]
    pub partial: bool,
    /// Ordered sub-ranges; composite granularity only. Emitted in the
    /// order declared.
    #[serde(default)]
    pub composite: Vec<CompositeRangeConfig>,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            granularity: default_granularity(),
            partial: false,
            composite: Vec::new(),
        }
    }
}

impl PartitionConfig {
    /// Build the partition plan, resolving composite bounds against
    /// `now`.
    ///
    /// # Errors
    ///
    /// Returns a message describing the malformed granularity or bound.
    pub fn plan(&self, now: DateTime<Utc>) -> Result<PartitionPlan, String> {
        if self.granularity.eq_ignore_ascii_case("composite") {
            let mut subs = Vec::with_capacity(self.composite.len());
            for entry in &self.composite {
                let granularity = Granularity::parse(&entry.granularity).ok_or_else(|| {
                    format!("invalid composite granularity '{}'", entry.granularity)
                })?;
                let from = resolve_bound(&entry.from, now)?;
                let to = resolve_bound(&entry.to, now)?;
                subs.push(SubRange {
                    granularity,
                    from,
                    to,
                });
            }
            return Ok(PartitionPlan::Composite(subs));
        }

        let granularity = Granularity::parse(&self.granularity)
            .ok_or_else(|| format!("invalid partition granularity '{}'", self.granularity))?;
        Ok(PartitionPlan::Single(granularity))
    }
}

fn resolve_bound(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    TimeAnchor::parse(input)
        .and_then(|anchor| anchor.resolve(now))
        .map_err(|e| e.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeRangeConfig {
    pub granularity: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub initial: PaginationInitial,
    /// Response fields carrying each pagination role. Transports that
    /// find these fields report their values back on the pull result.
    #[serde(default)]
    pub fields: PaginationFields,
}

/// Maps response fields to pagination roles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationFields {
    #[serde(default)]
    pub pagestart: Option<String>,
    #[serde(default)]
    pub pagesize: Option<String>,
    #[serde(default)]
    pub pageno: Option<String>,
}

/// Initial values seeded into the dynamic parameters on the first call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationInitial {
    #[serde(default)]
    pub pagestart: u64,
    #[serde(default)]
    pub pagesize: u64,
    #[serde(default = "default_pageno")]
    pub pageno: u64,
}

impl Default for PaginationInitial {
    fn default() -> Self {
        Self {
            pagestart: 0,
            pagesize: 0,
            pageno: default_pageno(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response field holding the session key; session control is
    /// enabled when set.
    #[serde(default)]
    pub key_field: Option<String>,
    /// Regex ending pagination when it matches the session key.
    #[serde(default)]
    pub stop_condition: Option<String>,
    /// Regex failing the work item when it matches the session key.
    #[serde(default)]
    pub fail_condition: Option<String>,
    /// Session value seeded into the first call.
    #[serde(default)]
    pub initial_value: Option<String>,
    /// Give up waiting for the stop condition after this long.
    #[serde(default = "default_session_timeout_secs")]
    pub timeout_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key_field: None,
            stop_condition: None,
            fail_condition: None,
            initial_value: None,
            timeout_seconds: default_session_timeout_secs(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.key_field.is_some()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Grace and abstinent windows applied to prior watermarks at plan time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default)]
    pub grace_period_days: u32,
    #[serde(default)]
    pub abstinent_period_days: u32,
}

impl WindowConfig {
    #[must_use]
    pub fn grace_ms(&self) -> i64 {
        i64::from(self.grace_period_days) * MILLIS_PER_DAY
    }

    #[must_use]
    pub fn abstinent_ms(&self) -> i64 {
        i64::from(self.abstinent_period_days) * MILLIS_PER_DAY
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Fail planning when fewer items are emitted.
    #[serde(default)]
    pub min_work_items: u32,
    /// Fail a work item that completes with fewer records.
    #[serde(default)]
    pub min_item_records: u64,
    /// Truncate planning at this many items; `0` = unbounded.
    #[serde(default)]
    pub parallelism_max: u32,
    /// Stagger between consecutive work-item starts.
    #[serde(default)]
    pub pacing_seconds: u64,
    /// Wait between consecutive calls on one connection.
    #[serde(default)]
    pub call_interval_millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryInputConfig {
    /// Location of the record set (JSON array file for the built-in
    /// reader).
    pub path: String,
    #[serde(default = "default_secondary_category")]
    pub category: SecondaryCategory,
    /// Project records down to these fields; empty keeps all.
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    #[default]
    Append,
    Snapshot,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FullLoadConfig {
    #[serde(default)]
    pub table_type: TableType,
    /// Force a full extract when no prior watermark state exists.
    #[serde(default)]
    pub dynamic: bool,
    /// Re-pull everything, ignoring prior watermarks.
    #[serde(default)]
    pub backfill: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub target: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_granularity() -> String {
    "none".to_string()
}

fn default_pageno() -> u64 {
    1
}

fn default_session_timeout_secs() -> u64 {
    600
}

fn default_secondary_category() -> SecondaryCategory {
    SecondaryCategory::Activation
}

fn default_state_path() -> String {
    "./inlet-state.db".to_string()
}
