use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use inlet_engine::config::{parser, validator};
use inlet_engine::planner;
use inlet_engine::secondary::{read_with_retries, JsonFileSecondaryInput};
use inlet_engine::PlainTextSecrets;
use inlet_state::{SqliteWatermarkStore, WatermarkStore};

/// Execute the `plan` command: compute and print the work-item list
/// without pulling anything.
pub async fn execute(job_path: &Path, ignore_state: bool) -> Result<()> {
    let config = parser::parse_job(job_path)
        .with_context(|| format!("Failed to parse job: {}", job_path.display()))?;
    validator::validate_job(&config)?;

    let job_id = config.job_id();
    let (previous, persisted_flag) = if ignore_state {
        (HashMap::new(), None)
    } else {
        let store = SqliteWatermarkStore::open(Path::new(&config.state.path))
            .with_context(|| format!("Failed to open state store: {}", config.state.path))?;
        (
            store.read_high_watermarks(&job_id)?,
            store.full_extract_flag(&job_id)?,
        )
    };

    let retries = if config.authentication_declared() {
        config.authentication_retry().count
    } else {
        0
    };
    let secondary =
        read_with_retries(&JsonFileSecondaryInput, &config.secondary_inputs, retries).await?;

    let plan = planner::plan(
        &config,
        &previous,
        persisted_flag,
        &secondary,
        &PlainTextSecrets,
        Utc::now(),
    )?;

    println!("Job:          {}", config.job);
    println!("Full extract: {}", plan.is_full_extract);
    println!("Work items:   {}", plan.work_items.len());
    println!();
    for item in &plan.work_items {
        println!("{}", item.signature);
        println!(
            "  range:  [{} .. {})",
            format_millis(item.low_watermark),
            format_millis(item.expected_high_watermark)
        );
        if item.scheduling_offset_ms > 0 {
            println!("  offset: {}ms", item.scheduling_offset_ms);
        }
        if !item.activation_parameters.is_empty() {
            println!(
                "  activation: {}",
                serde_json::Value::Object(item.activation_parameters.clone())
            );
        }
    }
    Ok(())
}

fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map_or_else(|| millis.to_string(), |dt| dt.to_rfc3339())
}
