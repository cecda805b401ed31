//! Work-item planner: turns watermark definitions and prior-run state
//! into a pruned, resumable work-item list.
//!
//! Planning is single-threaded and synchronous. It performs no I/O; the
//! caller supplies prior watermarks, the persisted full-extract flag,
//! and secondary input records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use inlet_types::secondary::{SecondaryCategory, SecondaryRecords};
use inlet_types::watermark::{WatermarkDefinition, WatermarkError};
use inlet_types::{work_item, WorkItem};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::types::{JobConfig, TableType, WatermarkKind};
use crate::connection::SecretResolver;
use crate::secondary::single_authentication;

/// Start of the default datetime range used when no datetime watermark
/// is declared.
const DEFAULT_RANGE_START: &str = "2019-01-01";
/// Name of the unit watermark synthesized from activation records.
const ACTIVATION_WATERMARK_NAME: &str = "activation";

/// Fatal planning failures; the job aborts before any pull work starts.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("1 and only 1 datetime watermark is allowed")]
    MultipleDatetimeWatermarks,
    #[error(
        "1 and only 1 unit watermark is allowed, \
         including the unit watermark generated from activation records"
    )]
    MultipleUnitWatermarks,
    #[error("planned {planned} work items, but the configured minimum is {minimum}")]
    BelowMinimum { minimum: u32, planned: usize },
    #[error("malformed partition configuration: {0}")]
    MalformedPartition(String),
    #[error("malformed watermark configuration: {0}")]
    MalformedWatermark(String),
    #[error(transparent)]
    Watermark(#[from] WatermarkError),
    #[error("failed to resolve credential field '{field}': {message}")]
    Secret { field: String, message: String },
}

/// The planner's output: the final work-item list plus the plan-wide
/// full-extract flag.
#[derive(Debug, Clone)]
pub struct Plan {
    pub work_items: Vec<WorkItem>,
    pub is_full_extract: bool,
}

/// Plan the job's work items.
///
/// Emits one item per surviving (datetime partition, unit partition)
/// pair, outer datetime and inner unit order, truncated at the
/// parallelism cap. Pairs whose prior watermark does not require a rerun
/// are pruned using the grace and abstinent windows; resumed pairs get
/// their lower bound raised to the prior cutoff. Back-fill mode ignores
/// prior watermarks entirely.
///
/// # Errors
///
/// Returns [`PlanError`] on duplicate watermark definitions, malformed
/// partition configuration, credential resolution failure, or when fewer
/// items than the configured minimum were emitted.
pub fn plan(
    config: &JobConfig,
    previous_high_watermarks: &HashMap<String, i64>,
    persisted_full_extract: Option<bool>,
    secondary: &SecondaryRecords,
    secrets: &dyn SecretResolver,
    now: DateTime<Utc>,
) -> Result<Plan, PlanError> {
    let definitions = build_definitions(config, secondary)?;
    let (datetime_def, unit_def) = resolve_definitions(config, definitions)?;

    let (range_from, range_to) = datetime_def
        .range(now)?
        .ok_or_else(|| PlanError::MalformedWatermark("datetime watermark has no range".into()))?;
    let partition_plan = config
        .partition
        .plan(now)
        .map_err(PlanError::MalformedPartition)?;
    let datetime_partitions = partition_plan.ranges(range_from, range_to, config.partition.partial);
    let unit_partitions = unit_def.units().to_vec();

    let payloads = secondary
        .get(&SecondaryCategory::Payload)
        .cloned()
        .unwrap_or_default();

    // Back-fill ignores prior state: every candidate pair is emitted,
    // subject only to the parallelism cap.
    let empty = HashMap::new();
    let previous = if config.full_load.backfill {
        &empty
    } else {
        previous_high_watermarks
    };

    let grace = config.window.grace_ms();
    let abstinent = config.window.abstinent_ms();
    let global_cutoff = previous.values().copied().max().map_or(-1, |max| max - grace);
    tracing::debug!(global_cutoff, "Planning with overall cutoff time");

    let cap = config.limits.parallelism_max as usize;
    let pacing_ms = config.limits.pacing_seconds.saturating_mul(1000);
    let datetime_name = datetime_def.long_name();
    let unit_name = unit_def.long_name();

    let mut work_items: Vec<WorkItem> = Vec::new();
    'outer: for dt_partition in &datetime_partitions {
        for unit in &unit_partitions {
            if cap > 0 && work_items.len() >= cap {
                break 'outer;
            }

            let signature = work_item::signature(
                &datetime_name,
                dt_partition.start_millis,
                &unit_name,
                unit,
            );

            // A pair found in prior state manages its watermark
            // independently of the global cutoff.
            let prior = previous.get(&signature).copied();
            let unit_cutoff = prior.map_or(-1, |wm| wm - grace + abstinent);
            if unit_cutoff != -1 && dt_partition.end_millis < unit_cutoff.max(global_cutoff) {
                tracing::debug!(
                    signature = signature.as_str(),
                    unit_cutoff,
                    "Skipping work item: prior watermark does not require a rerun"
                );
                continue;
            }

            // Resume from checkpoint: narrow the range only when the
            // stored watermark differs from the nominal lower bound.
            // First-time signatures are never narrowed.
            let low_watermark = match prior {
                None => dt_partition.start_millis,
                Some(wm) if wm == dt_partition.start_millis => dt_partition.start_millis,
                Some(_) => unit_cutoff.max(dt_partition.start_millis),
            };

            if config.cleanse_zero_width && low_watermark == dt_partition.end_millis {
                tracing::info!(
                    signature = signature.as_str(),
                    low_watermark,
                    "Skipping zero-width work item"
                );
                continue;
            }

            tracing::info!(
                signature = signature.as_str(),
                low_watermark,
                high_watermark = dt_partition.end_millis,
                "Planned work item"
            );
            let scheduling_offset_ms = work_items.len() as u64 * pacing_ms;
            work_items.push(WorkItem {
                signature,
                low_watermark,
                expected_high_watermark: dt_partition.end_millis,
                activation_parameters: activation_from_unit(&unit_def.name, unit),
                payload: payloads.clone(),
                scheduling_offset_ms,
                output_schema: config.schemas.output.clone(),
                target_schema: config.schemas.target.clone(),
            });
        }
    }

    if work_items.len() < config.limits.min_work_items as usize {
        return Err(PlanError::BelowMinimum {
            minimum: config.limits.min_work_items,
            planned: work_items.len(),
        });
    }

    // A single authentication record is merged into every item's
    // activation map, overwriting on name collision.
    if let Some(auth) = single_authentication(secondary) {
        if let Some(fields) = auth.as_object() {
            for item in &mut work_items {
                for (field, value) in fields {
                    let resolved = resolve_credential(secrets, field, value)?;
                    item.activation_parameters
                        .insert(field.clone(), Value::String(resolved));
                }
            }
        }
    }

    let is_full_extract = full_extract_flag(config, previous_high_watermarks, persisted_full_extract);
    Ok(Plan {
        work_items,
        is_full_extract,
    })
}

/// Collect watermark definitions from configuration plus the unit
/// watermark synthesized from activation records.
fn build_definitions(
    config: &JobConfig,
    secondary: &SecondaryRecords,
) -> Result<Vec<WatermarkDefinition>, PlanError> {
    let mut definitions = Vec::new();
    for watermark in &config.watermarks {
        match watermark.kind {
            WatermarkKind::Datetime => {
                let range = watermark.range.as_ref().ok_or_else(|| {
                    PlanError::MalformedWatermark(format!(
                        "datetime watermark '{}' has no range",
                        watermark.name
                    ))
                })?;
                definitions.push(WatermarkDefinition::datetime(
                    &watermark.name,
                    &range.from,
                    &range.to,
                )?);
            }
            WatermarkKind::Unit => {
                definitions.push(WatermarkDefinition::unit_from_list(
                    &watermark.name,
                    watermark.units.as_deref().unwrap_or(""),
                ));
            }
        }
    }

    let mut activations = secondary
        .get(&SecondaryCategory::Activation)
        .cloned()
        .unwrap_or_default();
    let payloads_present = secondary
        .get(&SecondaryCategory::Payload)
        .is_some_and(|p| !p.is_empty());

    // A payload without any activation still needs one unit partition to
    // carry it.
    if activations.is_empty()
        && payloads_present
        && !definitions.iter().any(WatermarkDefinition::is_unit)
    {
        activations.push(Value::Object(Map::new()));
    }

    if !activations.is_empty() {
        definitions.push(WatermarkDefinition::unit_from_records(
            ACTIVATION_WATERMARK_NAME,
            activations,
        ));
    }
    Ok(definitions)
}

/// Enforce the at-most-one rule per kind and fill in defaults.
fn resolve_definitions(
    config: &JobConfig,
    definitions: Vec<WatermarkDefinition>,
) -> Result<(WatermarkDefinition, WatermarkDefinition), PlanError> {
    let mut datetime_def = None;
    let mut unit_def = None;
    for definition in definitions {
        if definition.is_datetime() {
            if datetime_def.is_some() {
                return Err(PlanError::MultipleDatetimeWatermarks);
            }
            datetime_def = Some(definition);
        } else {
            if unit_def.is_some() {
                return Err(PlanError::MultipleUnitWatermarks);
            }
            unit_def = Some(definition);
        }
    }

    let unit_def = match unit_def {
        Some(definition) => definition,
        None => {
            // Some work items are expected but there is nothing to fan
            // out over.
            if config.limits.min_work_items > 0 {
                return Err(PlanError::BelowMinimum {
                    minimum: config.limits.min_work_items,
                    planned: 0,
                });
            }
            WatermarkDefinition::unit_from_records("unit", vec![Value::Object(Map::new())])
        }
    };
    let datetime_def = match datetime_def {
        Some(definition) => definition,
        None => WatermarkDefinition::datetime("datetime", DEFAULT_RANGE_START, "now")?,
    };
    Ok((datetime_def, unit_def))
}

fn activation_from_unit(unit_name: &str, unit: &Value) -> Map<String, Value> {
    match unit {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert(unit_name.to_string(), other.clone());
            map
        }
    }
}

fn resolve_credential(
    secrets: &dyn SecretResolver,
    field: &str,
    value: &Value,
) -> Result<String, PlanError> {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    secrets.decrypt(&raw).map_err(|e| PlanError::Secret {
        field: field.to_string(),
        message: e.to_string(),
    })
}

/// Decide the plan-wide full-extract flag.
fn full_extract_flag(
    config: &JobConfig,
    previous_high_watermarks: &HashMap<String, i64>,
    persisted: Option<bool>,
) -> bool {
    if config.full_load.backfill {
        return false;
    }
    if config.full_load.table_type == TableType::Snapshot {
        return true;
    }
    if config.full_load.dynamic && previous_high_watermarks.is_empty() {
        return true;
    }
    persisted.unwrap_or(false)
}
