//! Job orchestrator: plans work items, executes their pull loops
//! concurrently, and finalizes watermark state.

use std::sync::Arc;

use chrono::Utc;
use inlet_state::WatermarkStore;
use inlet_types::job::{JobId, RunStats, RunStatus};
use inlet_types::WorkItem;
use tokio::task::JoinSet;

use crate::config::types::JobConfig;
use crate::config::validator::validate_job;
use crate::connection::{ConnectionFactory, SecretResolver};
use crate::errors::JobError;
use crate::planner::plan;
use crate::puller::PullDriver;
use crate::secondary::{read_with_retries, SecondaryInputSource};

/// Result of one work item's execution.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub signature: String,
    pub status: RunStatus,
    pub records_pulled: u64,
    pub pages_fetched: u64,
    pub error: Option<String>,
}

/// Aggregate result of a job run. Item failures are isolated: a failed
/// item appears here with its error while siblings proceed.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: String,
    pub is_full_extract: bool,
    pub items: Vec<ItemOutcome>,
}

impl JobOutcome {
    #[must_use]
    pub fn records_pulled(&self) -> u64 {
        self.items.iter().map(|i| i.records_pulled).sum()
    }

    #[must_use]
    pub fn failed_items(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == RunStatus::Failed)
            .count()
    }
}

/// Run a store operation on the blocking pool.
async fn store_blocking<T, F>(store: Arc<dyn WatermarkStore>, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn WatermarkStore) -> Result<T, inlet_state::StateError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&*store))
        .await
        .map_err(|e| anyhow::anyhow!("state store task panicked: {e}"))?
        .map_err(Into::into)
}

/// Plan and execute a job.
///
/// Planning happens once, up front; configuration errors abort before
/// any pull work starts. Each planned item then runs its pull loop as an
/// independent task. On success an item's expected high watermark is
/// persisted; on failure its low watermark is written instead so the
/// next plan resumes from the checkpoint.
///
/// # Errors
///
/// Returns [`JobError`] on validation or planning failure, state-store
/// failure before item execution, or a panicked item task. Item-level
/// pull failures do *not* error; they are reported per item in the
/// returned [`JobOutcome`].
pub async fn run_job(
    config: &JobConfig,
    store: Arc<dyn WatermarkStore>,
    factory: Arc<dyn ConnectionFactory>,
    secondary: Arc<dyn SecondaryInputSource>,
    secrets: Arc<dyn SecretResolver>,
) -> Result<JobOutcome, JobError> {
    validate_job(config)?;
    let job_id = config.job_id();
    tracing::info!(
        job = job_id.as_str(),
        backfill = config.full_load.backfill,
        "Starting job run"
    );

    let previous = {
        let store = store.clone();
        let job_id = job_id.clone();
        store_blocking(store, move |s| s.read_high_watermarks(&job_id)).await?
    };
    let persisted_flag = {
        let store = store.clone();
        let job_id = job_id.clone();
        store_blocking(store, move |s| s.full_extract_flag(&job_id)).await?
    };

    let retry = config.authentication_retry();
    let plan_retries = if config.authentication_declared() {
        retry.count
    } else {
        0
    };
    let secondary_records =
        read_with_retries(&*secondary, &config.secondary_inputs, plan_retries).await?;

    let plan = plan(
        config,
        &previous,
        persisted_flag,
        &secondary_records,
        &*secrets,
        Utc::now(),
    )?;
    tracing::info!(
        job = job_id.as_str(),
        items = plan.work_items.len(),
        full_extract = plan.is_full_extract,
        "Planned work items"
    );

    {
        let store = store.clone();
        let job_id = job_id.clone();
        let flag = plan.is_full_extract;
        store_blocking(store, move |s| s.set_full_extract_flag(&job_id, flag)).await?;
    }

    let shared_config = Arc::new(config.clone());
    let mut join_set = JoinSet::new();
    for (index, item) in plan.work_items.into_iter().enumerate() {
        let task = run_one_item(
            item,
            job_id.clone(),
            shared_config.clone(),
            store.clone(),
            factory.clone(),
            secondary.clone(),
            secrets.clone(),
        );
        join_set.spawn(async move { (index, task.await) });
    }

    let mut indexed = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(entry) => indexed.push(entry),
            Err(join_err) => {
                return Err(JobError::Infrastructure(anyhow::anyhow!(
                    "Work item task panicked: {join_err}"
                )));
            }
        }
    }
    indexed.sort_by_key(|(index, _)| *index);
    let items = indexed.into_iter().map(|(_, outcome)| outcome).collect();

    Ok(JobOutcome {
        job: config.job.clone(),
        is_full_extract: plan.is_full_extract,
        items,
    })
}

async fn run_one_item(
    item: WorkItem,
    job_id: JobId,
    config: Arc<JobConfig>,
    store: Arc<dyn WatermarkStore>,
    factory: Arc<dyn ConnectionFactory>,
    secondary: Arc<dyn SecondaryInputSource>,
    secrets: Arc<dyn SecretResolver>,
) -> ItemOutcome {
    let signature = item.signature.clone();

    let run_id = {
        let store = store.clone();
        let job_id = job_id.clone();
        let signature = signature.clone();
        match store_blocking(store, move |s| s.start_run(&job_id, &signature)).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(
                    signature = item.signature.as_str(),
                    "Failed to record run start: {e}"
                );
                None
            }
        }
    };

    let pull_result = match factory.connect(&item) {
        Ok(mut conn) => {
            match PullDriver::new(&mut *conn, &config, &item, &*secondary, &*secrets) {
                Ok(mut driver) => driver.run().await,
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(inlet_types::SourceError::internal(
            "CONNECT_FAILED",
            format!("failed to open connection: {e}"),
        )),
    };

    let (mut status, records_pulled, pages_fetched, mut error) = match &pull_result {
        Ok(summary) => (
            RunStatus::Completed,
            summary.records_pulled,
            summary.pages_fetched,
            None,
        ),
        Err(e) => {
            tracing::error!(
                signature = signature.as_str(),
                "Work item failed: {e}"
            );
            (RunStatus::Failed, 0, 0, Some(e.to_string()))
        }
    };

    // Successful items advance to the expected high watermark; failed
    // items record the low watermark so the next plan resumes from the
    // checkpoint (the store keeps the maximum).
    let watermark = if pull_result.is_ok() {
        item.expected_high_watermark
    } else {
        item.low_watermark
    };
    {
        let store = store.clone();
        let job_id = job_id.clone();
        let sig = signature.clone();
        if let Err(e) =
            store_blocking(store, move |s| s.set_high_watermark(&job_id, &sig, watermark)).await
        {
            tracing::error!(
                signature = signature.as_str(),
                "Failed to persist watermark: {e}"
            );
            status = RunStatus::Failed;
            error.get_or_insert_with(|| format!("failed to persist watermark: {e}"));
        }
    }

    if let Some(run_id) = run_id {
        let stats = RunStats {
            records_pulled,
            pages_fetched,
            error_message: error.clone(),
        };
        let store = store.clone();
        if let Err(e) =
            store_blocking(store, move |s| s.complete_run(run_id, status, &stats)).await
        {
            tracing::warn!(
                signature = signature.as_str(),
                "Failed to record run completion: {e}"
            );
        }
    }

    ItemOutcome {
        signature,
        status,
        records_pulled,
        pages_fetched,
        error,
    }
}
