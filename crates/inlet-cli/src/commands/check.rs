use std::path::Path;

use anyhow::{Context, Result};
use inlet_engine::config::{parser, validator};

/// Execute the `check` command: validate the job configuration.
pub fn execute(job_path: &Path) -> Result<()> {
    let config = parser::parse_job(job_path)
        .with_context(|| format!("Failed to parse job: {}", job_path.display()))?;
    println!("Job YAML:      OK");

    validator::validate_job(&config)?;
    println!("Job structure: OK");

    println!("\nAll checks passed.");
    Ok(())
}
