//! Job YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::JobConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error if any referenced environment variable is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let mut errors = Vec::new();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(val) => {
                result = result.replace(&cap[0], &val);
            }
            Err(_) => {
                errors.push(var_name.to_string());
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", errors.join(", "));
    }

    Ok(result)
}

/// Parse a job YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_job_str(yaml_str: &str) -> Result<JobConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: JobConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse job YAML")?;
    Ok(config)
}

/// Parse a job YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_job(path: &Path) -> Result<JobConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file: {}", path.display()))?;
    parse_job_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("INLET_TEST_HOST", "api.example.com");
        let input = "template: https://${INLET_TEST_HOST}/orders";
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains("api.example.com"));
        assert!(!result.contains("${INLET_TEST_HOST}"));
        std::env::remove_var("INLET_TEST_HOST");
    }

    #[test]
    fn test_multiple_env_vars() {
        std::env::set_var("INLET_TEST_A", "alpha");
        std::env::set_var("INLET_TEST_B", "beta");
        let input = "${INLET_TEST_A} and ${INLET_TEST_B}";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "alpha and beta");
        std::env::remove_var("INLET_TEST_A");
        std::env::remove_var("INLET_TEST_B");
    }

    #[test]
    fn test_no_env_vars_passthrough() {
        let input = "job: orders\nversion: \"1.0\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, input);
    }

    #[test]
    fn test_missing_env_var_errors() {
        let input = "token: ${INLET_DEFINITELY_NOT_SET_12345}";
        let result = substitute_env_vars(input);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("INLET_DEFINITELY_NOT_SET_12345"));
    }

    #[test]
    fn test_multiple_missing_env_vars_all_reported() {
        let input = "${INLET_MISSING_X} and ${INLET_MISSING_Y}";
        let result = substitute_env_vars(input);
        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("INLET_MISSING_X"));
        assert!(err_msg.contains("INLET_MISSING_Y"));
    }

    #[test]
    fn test_parse_job_from_string() {
        std::env::set_var("INLET_TEST_ENDPOINT", "https://api.example.com/v2");
        let yaml = r#"
version: "1.0"
job: orders_sync
source:
  template: "${INLET_TEST_ENDPOINT}/orders?start={{pagestart}}"
watermarks:
  - name: datetime
    type: datetime
    range: { from: "2024-01-01", to: "now" }
partition:
  granularity: daily
limits:
  parallelism_max: 4
"#;
        let config = parse_job_str(yaml).unwrap();
        assert_eq!(config.job, "orders_sync");
        assert_eq!(config.limits.parallelism_max, 4);
        assert!(config
            .source
            .template
            .as_deref()
            .unwrap()
            .starts_with("https://api.example.com/v2"));
        std::env::remove_var("INLET_TEST_ENDPOINT");
    }

    #[test]
    fn test_parse_invalid_yaml_errors() {
        let yaml = "this is not: [valid: yaml: {{{}}}";
        assert!(parse_job_str(yaml).is_err());
    }

    #[test]
    fn test_parse_job_file_not_found() {
        let result = parse_job(Path::new("/nonexistent/job.yaml"));
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to read job file"));
    }
}
