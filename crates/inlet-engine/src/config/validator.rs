//! Semantic validation for parsed job configuration values.

use anyhow::{bail, Result};
use regex::Regex;

use crate::config::types::{JobConfig, WatermarkKind};

fn validate_watermarks(config: &JobConfig, errors: &mut Vec<String>) {
    let datetime_count = config
        .watermarks
        .iter()
        .filter(|w| w.kind == WatermarkKind::Datetime)
        .count();
    let unit_count = config
        .watermarks
        .iter()
        .filter(|w| w.kind == WatermarkKind::Unit)
        .count();

    if datetime_count > 1 {
        errors.push("At most one datetime watermark is allowed".to_string());
    }
    if unit_count > 1 {
        errors.push(
            "At most one unit watermark is allowed, \
             including the unit watermark generated from activation records"
                .to_string(),
        );
    }

    for watermark in &config.watermarks {
        match watermark.kind {
            WatermarkKind::Datetime => {
                if watermark.range.is_none() {
                    errors.push(format!(
                        "Datetime watermark '{}' must declare a range",
                        watermark.name
                    ));
                }
            }
            WatermarkKind::Unit => {
                if watermark.units.as_deref().map_or(true, str::is_empty) {
                    errors.push(format!(
                        "Unit watermark '{}' must declare units",
                        watermark.name
                    ));
                }
            }
        }
        if watermark.name.trim().is_empty() {
            errors.push("Watermark names must not be empty".to_string());
        }
    }
}

fn validate_session(config: &JobConfig, errors: &mut Vec<String>) {
    for (label, pattern) in [
        ("stop_condition", &config.session.stop_condition),
        ("fail_condition", &config.session.fail_condition),
    ] {
        if let Some(pattern) = pattern {
            if Regex::new(pattern).is_err() {
                errors.push(format!("Session {label} is not a valid regex: '{pattern}'"));
            }
        }
    }

    if !config.session.enabled()
        && (config.session.stop_condition.is_some() || config.session.fail_condition.is_some())
    {
        errors.push(
            "Session stop/fail conditions require a session key_field".to_string(),
        );
    }
}

fn validate_partition(config: &JobConfig, errors: &mut Vec<String>) {
    let granularity = config.partition.granularity.as_str();
    if granularity.eq_ignore_ascii_case("composite") {
        if config.partition.composite.is_empty() {
            errors.push("Composite partitioning requires at least one sub-range".to_string());
        }
        for (i, sub) in config.partition.composite.iter().enumerate() {
            if sub.granularity.eq_ignore_ascii_case("composite") {
                errors.push(format!("Composite sub-range {i} must not itself be composite"));
            } else if inlet_types::Granularity::parse(&sub.granularity).is_none() {
                errors.push(format!(
                    "Composite sub-range {i} has invalid granularity '{}'",
                    sub.granularity
                ));
            }
        }
    } else if inlet_types::Granularity::parse(granularity).is_none() {
        errors.push(format!("Invalid partition granularity '{granularity}'"));
    }
}

fn validate_secondary_inputs(config: &JobConfig, errors: &mut Vec<String>) {
    for (i, input) in config.secondary_inputs.iter().enumerate() {
        if input.path.trim().is_empty() {
            errors.push(format!("Secondary input {i} has an empty path"));
        }
    }
}

/// Validate a parsed job configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the job
/// config.
pub fn validate_job(config: &JobConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported job version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.job.trim().is_empty() {
        errors.push("Job name must not be empty".to_string());
    }

    validate_watermarks(config, &mut errors);
    validate_session(config, &mut errors);
    validate_partition(config, &mut errors);
    validate_secondary_inputs(config, &mut errors);

    if config.total_count_field.as_deref() == Some("") {
        errors.push("total_count_field must not be empty when set".to_string());
    }

    if !errors.is_empty() {
        bail!("Job validation failed:\n  - {}", errors.join("\n  - "));
    }
    Ok(())
}
