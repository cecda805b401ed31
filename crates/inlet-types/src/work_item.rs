//! Work items: the unit of independently plannable, pullable extraction.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Build the stable identity string for a (datetime, unit) partition
/// pair. The same logical partition must produce the same signature on
/// every run, since signatures key the prior-state watermark lookup.
#[must_use]
pub fn signature(
    datetime_name: &str,
    low_watermark: i64,
    unit_name: &str,
    unit: &Value,
) -> String {
    format!("[{datetime_name}.{low_watermark}, {unit_name}.{unit}]")
}

/// One unit of pull work, created once per plan and immutable thereafter.
/// Runtime state lives in the [`ExecutionState`] attached at pull time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable identity used as the prior-state lookup key.
    pub signature: String,
    /// Assigned lower time bound (epoch millis, inclusive).
    pub low_watermark: i64,
    /// Assigned upper time bound (epoch millis, exclusive).
    pub expected_high_watermark: i64,
    /// Key/value map seeded from the unit-partition record, optionally
    /// overlaid with a resolved authentication token.
    pub activation_parameters: Map<String, Value>,
    /// Opaque payload records shared by all items of the plan.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<Value>,
    /// Pacing delay relative to plan start, in milliseconds.
    pub scheduling_offset_ms: u64,
    /// Pre-resolved output schema, if configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Pre-resolved target schema, if configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_schema: Option<Value>,
}

/// Per-item runtime state, mutated only by the pull state machine and the
/// connection bound to the item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub signature: String,
    pub activation_parameters: Map<String, Value>,
    /// Variable values advanced on each call (pagination, session, ...).
    pub dynamic_parameters: Map<String, Value>,
    /// Records consumed so far; monotonically increasing.
    pub processed_count: u64,
    /// Session key value from the most recent call.
    pub session_key_value: String,
    /// Schema inferred from a call's side-channel metadata, when no
    /// explicit schema is configured.
    pub inferred_schema: Option<String>,
    /// Whether the source marks end-of-feed explicitly.
    pub explicit_eof: bool,
}

impl ExecutionState {
    /// Seed runtime state for one work item.
    #[must_use]
    pub fn for_item(item: &WorkItem, explicit_eof: bool) -> Self {
        Self {
            signature: item.signature.clone(),
            activation_parameters: item.activation_parameters.clone(),
            explicit_eof,
            ..Self::default()
        }
    }
}
