//! Secondary input coordination: categorized reads with bounded
//! authentication retries.
//!
//! Shared by the planner (credential merge at plan time) and by the pull
//! state machine's credential-refresh path.

use std::time::Duration;

use anyhow::{Context, Result};
use inlet_types::secondary::{SecondaryCategory, SecondaryRecords};

use crate::config::types::SecondaryInputConfig;

/// Source of secondary input records, read-only from the core's
/// perspective during a single plan.
pub trait SecondaryInputSource: Send + Sync {
    /// Read all declared inputs, partitioned by category.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O or decode failure.
    fn read_all(&self, declarations: &[SecondaryInputConfig]) -> Result<SecondaryRecords>;
}

/// Read secondary inputs, re-reading while the declared authentication
/// input stays empty.
///
/// When `authentication` is declared but came back empty and `retries`
/// remain, sleeps the declared retry delay and reads again with one
/// fewer retry; otherwise returns whatever was read. An empty
/// authentication result after exhaustion is *not* an error here; the
/// caller decides whether a missing credential is fatal.
///
/// # Errors
///
/// Returns an error only when the underlying source fails.
pub async fn read_with_retries(
    source: &dyn SecondaryInputSource,
    declarations: &[SecondaryInputConfig],
    retries: u32,
) -> Result<SecondaryRecords> {
    let auth_declared = declarations
        .iter()
        .any(|d| d.category == SecondaryCategory::Authentication);
    let delay = declarations
        .iter()
        .find(|d| d.category == SecondaryCategory::Authentication)
        .map(|d| d.retry.delay_secs)
        .unwrap_or_default();

    let mut remaining = retries;
    loop {
        let records = source.read_all(declarations)?;
        let auth_empty = records
            .get(&SecondaryCategory::Authentication)
            .map_or(true, Vec::is_empty);

        if auth_declared && auth_empty && remaining > 0 {
            tracing::info!(
                remaining,
                delay_secs = delay,
                "Authentication secondary input empty, will re-read"
            );
            remaining -= 1;
            tokio::time::sleep(Duration::from_secs(delay)).await;
            continue;
        }
        return Ok(records);
    }
}

/// The authentication record to merge, but only when exactly one was
/// supplied. Zero records means "no credential available"; more than one
/// is ambiguous and also skipped.
#[must_use]
pub fn single_authentication(records: &SecondaryRecords) -> Option<&serde_json::Value> {
    match records.get(&SecondaryCategory::Authentication) {
        Some(auth) if auth.len() == 1 => auth.first(),
        _ => None,
    }
}

/// Reads each declaration's `path` as a JSON array file.
///
/// Authentication and activation inputs are materialized into records,
/// optionally projected down to the declared `fields`. Payload and
/// validation inputs are passed through as their declarations; their
/// records are not loaded until a work item consumes them.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileSecondaryInput;

impl SecondaryInputSource for JsonFileSecondaryInput {
    fn read_all(&self, declarations: &[SecondaryInputConfig]) -> Result<SecondaryRecords> {
        let mut records = SecondaryRecords::new();
        for declaration in declarations {
            let bucket = records.entry(declaration.category).or_default();
            match declaration.category {
                SecondaryCategory::Authentication | SecondaryCategory::Activation => {
                    bucket.extend(read_records(declaration)?);
                }
                SecondaryCategory::Payload | SecondaryCategory::Validation => {
                    bucket.push(serde_json::json!({ "path": declaration.path }));
                }
            }
        }
        Ok(records)
    }
}

fn read_records(declaration: &SecondaryInputConfig) -> Result<Vec<serde_json::Value>> {
    let content = std::fs::read_to_string(&declaration.path)
        .with_context(|| format!("Failed to read secondary input: {}", declaration.path))?;
    let parsed: Vec<serde_json::Value> = serde_json::from_str(&content)
        .with_context(|| format!("Secondary input is not a JSON array: {}", declaration.path))?;

    if declaration.fields.is_empty() {
        return Ok(parsed);
    }
    Ok(parsed
        .into_iter()
        .map(|record| project_fields(record, &declaration.fields))
        .collect())
}

fn project_fields(record: serde_json::Value, fields: &[String]) -> serde_json::Value {
    match record {
        serde_json::Value::Object(map) => {
            let projected = map
                .into_iter()
                .filter(|(k, _)| fields.iter().any(|f| f == k))
                .collect();
            serde_json::Value::Object(projected)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inlet_types::secondary::RetryPolicy;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn declaration(path: &str, category: SecondaryCategory) -> SecondaryInputConfig {
        SecondaryInputConfig {
            path: path.to_string(),
            category,
            fields: vec![],
            retry: RetryPolicy {
                delay_secs: 0,
                count: 3,
            },
        }
    }

    struct CountingSource {
        reads: AtomicU32,
        auth_available_after: u32,
    }

    impl SecondaryInputSource for CountingSource {
        fn read_all(&self, _declarations: &[SecondaryInputConfig]) -> Result<SecondaryRecords> {
            let read = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            let mut records = SecondaryRecords::new();
            let bucket = records
                .entry(SecondaryCategory::Authentication)
                .or_default();
            if read > self.auth_available_after {
                bucket.push(serde_json::json!({"token": "fresh"}));
            }
            Ok(records)
        }
    }

    #[tokio::test]
    async fn retries_until_auth_available() {
        let source = CountingSource {
            reads: AtomicU32::new(0),
            auth_available_after: 2,
        };
        let decls = vec![declaration("x", SecondaryCategory::Authentication)];

        let records = read_with_retries(&source, &decls, 3).await.unwrap();
        assert_eq!(source.reads.load(Ordering::SeqCst), 3);
        assert!(single_authentication(&records).is_some());
    }

    #[tokio::test]
    async fn exhausted_retries_return_empty_auth() {
        let source = CountingSource {
            reads: AtomicU32::new(0),
            auth_available_after: 100,
        };
        let decls = vec![declaration("x", SecondaryCategory::Authentication)];

        let records = read_with_retries(&source, &decls, 2).await.unwrap();
        // initial read plus two delayed re-reads
        assert_eq!(source.reads.load(Ordering::SeqCst), 3);
        assert!(single_authentication(&records).is_none());
    }

    #[tokio::test]
    async fn no_auth_declared_reads_once() {
        let source = CountingSource {
            reads: AtomicU32::new(0),
            auth_available_after: 100,
        };
        let decls = vec![declaration("x", SecondaryCategory::Activation)];

        let _ = read_with_retries(&source, &decls, 5).await.unwrap();
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn single_authentication_requires_exactly_one() {
        let mut records = SecondaryRecords::new();
        assert!(single_authentication(&records).is_none());

        records
            .entry(SecondaryCategory::Authentication)
            .or_default()
            .push(serde_json::json!({"token": "a"}));
        assert!(single_authentication(&records).is_some());

        records
            .get_mut(&SecondaryCategory::Authentication)
            .unwrap()
            .push(serde_json::json!({"token": "b"}));
        assert!(single_authentication(&records).is_none());
    }

    #[test]
    fn json_file_source_reads_and_projects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"[{{"token": "t1", "expires": 99, "noise": true}}]"#
        )
        .unwrap();

        let mut decl = declaration(path.to_str().unwrap(), SecondaryCategory::Authentication);
        decl.fields = vec!["token".into(), "expires".into()];

        let records = JsonFileSecondaryInput.read_all(&[decl]).unwrap();
        let auth = &records[&SecondaryCategory::Authentication];
        assert_eq!(auth.len(), 1);
        assert_eq!(auth[0], serde_json::json!({"token": "t1", "expires": 99}));
    }

    #[test]
    fn json_file_source_passes_payload_declarations_through() {
        let decl = declaration("/data/payload.json", SecondaryCategory::Payload);
        let records = JsonFileSecondaryInput.read_all(&[decl]).unwrap();
        let payload = &records[&SecondaryCategory::Payload];
        assert_eq!(payload.len(), 1);
        assert_eq!(payload[0]["path"], "/data/payload.json");
    }

    #[test]
    fn json_file_source_missing_file_errors() {
        let decl = declaration("/nonexistent/auth.json", SecondaryCategory::Authentication);
        let err = JsonFileSecondaryInput.read_all(&[decl]).unwrap_err();
        assert!(err.to_string().contains("Failed to read secondary input"));
    }
}
