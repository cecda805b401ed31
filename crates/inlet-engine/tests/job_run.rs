//! End-to-end job runs: plan, pull, persist, and resume.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use inlet_engine::config::parser::parse_job_str;
use inlet_engine::config::types::SecondaryInputConfig;
use inlet_engine::secondary::SecondaryInputSource;
use inlet_engine::{
    run_job, Connection, ConnectionFactory, JobError, PlainTextSecrets, PullRequest,
    SecretResolver,
};
use inlet_state::{SqliteWatermarkStore, WatermarkStore};
use inlet_types::job::RunStatus;
use inlet_types::{CallError, PullResult, SecondaryRecords, SourceError, WorkItem};

struct NoSecondary;

impl SecondaryInputSource for NoSecondary {
    fn read_all(&self, _declarations: &[SecondaryInputConfig]) -> anyhow::Result<SecondaryRecords> {
        Ok(SecondaryRecords::new())
    }
}

/// Serves one page of `records` rows, failing instead when the item's
/// activation region matches `fail_region`.
struct OnePageConnection {
    records: u64,
    fail: bool,
}

#[async_trait]
impl Connection for OnePageConnection {
    async fn execute_first(
        &mut self,
        _request: &PullRequest,
        _prior: &PullResult,
    ) -> Result<Option<PullResult>, CallError> {
        if self.fail {
            return Err(CallError::Fatal(SourceError::transport(
                "CONN_RESET",
                "connection reset by peer",
            )));
        }
        Ok(Some(PullResult {
            buffer: Some(Bytes::from_static(b"{}")),
            set_count: self.records,
            ..PullResult::default()
        }))
    }

    async fn execute_next(
        &mut self,
        _request: &PullRequest,
        _prior: &PullResult,
    ) -> Result<Option<PullResult>, CallError> {
        Ok(None)
    }
}

struct OnePageFactory {
    records: u64,
    fail_region: Option<String>,
}

impl ConnectionFactory for OnePageFactory {
    fn connect(&self, item: &WorkItem) -> anyhow::Result<Box<dyn Connection + Send>> {
        let fail = match (&self.fail_region, item.activation_parameters.get("region")) {
            (Some(bad), Some(region)) => region == &serde_json::json!(bad),
            _ => false,
        };
        Ok(Box::new(OnePageConnection {
            records: self.records,
            fail,
        }))
    }
}

fn deps(
    records: u64,
    fail_region: Option<&str>,
) -> (
    Arc<SqliteWatermarkStore>,
    Arc<OnePageFactory>,
    Arc<NoSecondary>,
    Arc<PlainTextSecrets>,
) {
    (
        Arc::new(SqliteWatermarkStore::in_memory().unwrap()),
        Arc::new(OnePageFactory {
            records,
            fail_region: fail_region.map(String::from),
        }),
        Arc::new(NoSecondary),
        Arc::new(PlainTextSecrets),
    )
}

#[tokio::test]
async fn run_persists_watermarks_and_next_plan_prunes() {
    let yaml = r#"
job: orders
watermarks:
  - { name: datetime, type: datetime, range: { from: "2024-01-01", to: "2024-01-03" } }
partition:
  granularity: daily
"#;
    let config = parse_job_str(yaml).unwrap();
    let (store, factory, secondary, secrets) = deps(3, None);

    let outcome = run_job(
        &config,
        store.clone(),
        factory.clone(),
        secondary.clone(),
        secrets.clone(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.items.len(), 2);
    assert_eq!(outcome.failed_items(), 0);
    assert_eq!(outcome.records_pulled(), 6);

    let watermarks = store.read_high_watermarks(&config.job_id()).unwrap();
    assert_eq!(watermarks.len(), 2);
    for item in &outcome.items {
        assert_eq!(item.status, RunStatus::Completed);
        assert!(watermarks.contains_key(&item.signature));
    }

    // Every partition completed to its upper bound; a second run plans
    // nothing.
    let outcome = run_job(&config, store, factory, secondary, secrets)
        .await
        .unwrap();
    assert!(outcome.items.is_empty());
}

#[tokio::test]
async fn failed_item_is_isolated_and_replanned() {
    let yaml = r#"
job: orders
watermarks:
  - { name: datetime, type: datetime, range: { from: "2024-01-01", to: "2024-01-02" } }
  - { name: region, type: unit, units: "good,bad" }
"#;
    let config = parse_job_str(yaml).unwrap();
    let (store, factory, secondary, secrets) = deps(5, Some("bad"));

    let outcome = run_job(
        &config,
        store.clone(),
        factory.clone(),
        secondary.clone(),
        secrets.clone(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.items.len(), 2);
    assert_eq!(outcome.failed_items(), 1);

    let failed = outcome
        .items
        .iter()
        .find(|i| i.status == RunStatus::Failed)
        .unwrap();
    assert!(failed.signature.contains("bad"));
    assert!(failed.error.as_deref().unwrap().contains("CONN_RESET"));

    // The failed item's watermark stayed at its low bound, so only it is
    // replanned with the full range intact.
    let second = run_job(&config, store, factory, secondary, secrets)
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert!(second.items[0].signature.contains("bad"));
}

#[tokio::test]
async fn snapshot_table_records_full_extract_flag() {
    let yaml = r#"
job: orders
watermarks:
  - { name: datetime, type: datetime, range: { from: "2024-01-01", to: "2024-01-02" } }
full_load:
  table_type: snapshot
"#;
    let config = parse_job_str(yaml).unwrap();
    let (store, factory, secondary, secrets) = deps(1, None);

    let outcome = run_job(&config, store.clone(), factory, secondary, secrets)
        .await
        .unwrap();
    assert!(outcome.is_full_extract);
    assert_eq!(
        store.full_extract_flag(&config.job_id()).unwrap(),
        Some(true)
    );
}

#[tokio::test]
async fn below_minimum_plan_aborts_job() {
    let yaml = r#"
job: orders
watermarks:
  - { name: datetime, type: datetime, range: { from: "2024-01-01", to: "2024-01-02" } }
limits:
  min_work_items: 3
"#;
    let config = parse_job_str(yaml).unwrap();
    let (store, factory, secondary, secrets) = deps(1, None);

    let err = run_job(&config, store, factory, secondary, secrets)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Plan(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn invalid_config_aborts_before_planning() {
    let yaml = r#"
job: orders
partition:
  granularity: fortnightly
"#;
    let config = parse_job_str(yaml).unwrap();
    let (store, factory, secondary, secrets) = deps(1, None);

    let err = run_job(&config, store, factory, secondary, secrets)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Infrastructure(_)));
    assert!(err.to_string().contains("granularity"));
}

#[tokio::test]
async fn connect_failure_fails_only_that_item() {
    struct RefusingFactory;

    impl ConnectionFactory for RefusingFactory {
        fn connect(&self, item: &WorkItem) -> anyhow::Result<Box<dyn Connection + Send>> {
            if item.signature.contains("bad") {
                anyhow::bail!("no route to host");
            }
            Ok(Box::new(OnePageConnection {
                records: 1,
                fail: false,
            }))
        }
    }

    let yaml = r#"
job: orders
watermarks:
  - { name: region, type: unit, units: "good,bad" }
"#;
    let config = parse_job_str(yaml).unwrap();
    let store = Arc::new(SqliteWatermarkStore::in_memory().unwrap());
    let secrets: Arc<dyn SecretResolver> = Arc::new(PlainTextSecrets);

    let outcome = run_job(
        &config,
        store,
        Arc::new(RefusingFactory),
        Arc::new(NoSecondary),
        secrets,
    )
    .await
    .unwrap();

    assert_eq!(outcome.items.len(), 2);
    assert_eq!(outcome.failed_items(), 1);
    let failed = outcome
        .items
        .iter()
        .find(|i| i.status == RunStatus::Failed)
        .unwrap();
    assert!(failed.error.as_deref().unwrap().contains("no route to host"));
}
