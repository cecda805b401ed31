//! The pull state machine: drives a transport connection through the
//! first call, paginated calls, termination checks, and credential
//! refresh.
//!
//! Calls on a single connection are strictly sequential; each call
//! depends on the previous call's result and session-key value.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use inlet_types::{CallError, ExecutionState, PullResult, SourceError, WorkItem};
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::config::types::JobConfig;
use crate::connection::{Connection, PullRequest, SecretResolver};
use crate::secondary::{read_with_retries, single_authentication, SecondaryInputSource};
use crate::template;

/// Reserved dynamic parameter names.
const PARAM_WATERMARK: &str = "watermark";
const PARAM_PAGESTART: &str = "pagestart";
const PARAM_PAGESIZE: &str = "pagesize";
const PARAM_PAGENO: &str = "pageno";
const PARAM_SESSION: &str = "session";

/// Outcome of a completed work-item pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSummary {
    pub signature: String,
    pub records_pulled: u64,
    pub pages_fetched: u64,
    pub inferred_schema: Option<String>,
}

enum Flow {
    Continue,
    Done,
}

impl<'a> std::fmt::Debug for PullDriver<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullDriver").finish_non_exhaustive()
    }
}

/// Drives one work item's pull loop against its bound connection.
pub struct PullDriver<'a> {
    conn: &'a mut (dyn Connection + Send),
    config: &'a JobConfig,
    item: &'a WorkItem,
    secondary: &'a dyn SecondaryInputSource,
    secrets: &'a dyn SecretResolver,
    state: ExecutionState,
    status: PullResult,
    stop_re: Option<Regex>,
    fail_re: Option<Regex>,
    /// Credential fields merged during refresh; survive parameter
    /// rebuilds.
    credential_overrides: Map<String, Value>,
    page_start: u64,
    page_size: u64,
    page_number: u64,
    auth_budget: u32,
    started: Option<Instant>,
}

impl<'a> PullDriver<'a> {
    /// Bind a driver to one work item and its connection.
    ///
    /// # Errors
    ///
    /// Returns a config-category [`SourceError`] when a session condition
    /// regex does not compile.
    pub fn new(
        conn: &'a mut (dyn Connection + Send),
        config: &'a JobConfig,
        item: &'a WorkItem,
        secondary: &'a dyn SecondaryInputSource,
        secrets: &'a dyn SecretResolver,
    ) -> Result<Self, SourceError> {
        let stop_re = compile_condition(config.session.stop_condition.as_deref())?;
        let fail_re = compile_condition(config.session.fail_condition.as_deref())?;
        Ok(Self {
            conn,
            config,
            item,
            secondary,
            secrets,
            state: ExecutionState::for_item(item, config.explicit_eof),
            status: PullResult::default(),
            stop_re,
            fail_re,
            credential_overrides: Map::new(),
            page_start: config.pagination.initial.pagestart,
            page_size: config.pagination.initial.pagesize,
            page_number: config.pagination.initial.pageno,
            auth_budget: config.authentication_retry().count,
            started: None,
        })
    }

    /// Current execution state, for observability.
    #[must_use]
    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Run the item to completion. Shared/pooled connection resources
    /// are released exactly once at teardown, on success and failure
    /// alike.
    ///
    /// # Errors
    ///
    /// Returns the [`SourceError`] that failed the item.
    pub async fn run(&mut self) -> Result<ItemSummary, SourceError> {
        let outcome = self.run_inner().await;
        if !self.conn.close_all("") {
            tracing::warn!(
                signature = self.state.signature.as_str(),
                "Connection close_all reported failure"
            );
        }
        outcome
    }

    async fn run_inner(&mut self) -> Result<ItemSummary, SourceError> {
        // Wait for the planner-assigned start slot.
        if self.item.scheduling_offset_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.item.scheduling_offset_ms)).await;
        }
        self.started = Some(Instant::now());
        self.rebuild_parameters();

        let mut ever_buffered = false;
        let mut pages = 0u64;
        let mut first = true;
        loop {
            if !first {
                tokio::time::sleep(self.config.call_interval()).await;
                if self.config.pagination.enabled {
                    self.advance_pagination();
                }
                self.rebuild_parameters();
            }

            let outcome = self.call(first).await?;
            first = false;
            let Some(result) = outcome else {
                tracing::info!(
                    signature = self.state.signature.as_str(),
                    "Source signalled no further data"
                );
                break;
            };
            pages += 1;

            let new_records = result.set_count;
            ever_buffered |= result.buffer.is_some();
            self.state.processed_count += new_records;
            self.absorb(result);

            if !self.conn.close_stream() {
                tracing::warn!(
                    signature = self.state.signature.as_str(),
                    "Connection close_stream reported failure"
                );
            }

            match self.check_termination(ever_buffered, new_records)? {
                Flow::Done => break,
                Flow::Continue => {}
            }
        }

        if self.state.processed_count < self.config.limits.min_item_records {
            return Err(SourceError::data(
                "MIN_RECORDS_NOT_MET",
                format!(
                    "work item produced {} records, minimum is {}",
                    self.state.processed_count, self.config.limits.min_item_records
                ),
            ));
        }

        Ok(ItemSummary {
            signature: self.state.signature.clone(),
            records_pulled: self.state.processed_count,
            pages_fetched: pages,
            inferred_schema: self.state.inferred_schema.clone(),
        })
    }

    /// Issue one call, refreshing credentials and retrying in place on a
    /// retriable-authentication signal.
    async fn call(&mut self, first: bool) -> Result<Option<PullResult>, SourceError> {
        loop {
            let request = self.build_request();
            let attempt = if first {
                self.conn.execute_first(&request, &self.status).await
            } else {
                self.conn.execute_next(&request, &self.status).await
            };
            match attempt {
                Ok(outcome) => return Ok(outcome),
                Err(CallError::RetriableAuth(message)) => {
                    self.refresh_credentials(&message).await?;
                }
                Err(CallError::Fatal(error)) => return Err(error),
            }
        }
    }

    /// One credential-refresh excursion: wait the declared delay, re-read
    /// the secondary inputs, and merge a fresh authentication record into
    /// the dynamic parameters. The declared retry count bounds the total
    /// number of delayed re-reads per work item; exhausting it fails the
    /// item.
    async fn refresh_credentials(&mut self, message: &str) -> Result<(), SourceError> {
        if self.auth_budget == 0 {
            return Err(SourceError::auth(
                "AUTH_RETRY_EXHAUSTED",
                format!("credential refresh budget exhausted: {message}"),
            ));
        }
        self.auth_budget -= 1;
        let retry = self.config.authentication_retry();
        tracing::warn!(
            signature = self.state.signature.as_str(),
            remaining = self.auth_budget,
            delay_secs = retry.delay_secs,
            "Stale credential, re-reading authentication input"
        );
        tokio::time::sleep(Duration::from_secs(retry.delay_secs)).await;

        let records = read_with_retries(self.secondary, &self.config.secondary_inputs, 0)
            .await
            .map_err(|e| SourceError::internal("SECONDARY_READ_FAILED", e.to_string()))?;
        let Some(auth) = single_authentication(&records) else {
            // No fresh record yet; the retried call may consume another
            // slot of the budget.
            return Ok(());
        };
        if let Some(fields) = auth.as_object() {
            for (field, value) in fields {
                let raw = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let resolved = self.secrets.decrypt(&raw).map_err(|e| {
                    SourceError::auth("CREDENTIAL_DECRYPT_FAILED", e.to_string())
                })?;
                self.credential_overrides
                    .insert(field.clone(), Value::String(resolved.clone()));
                self.state
                    .dynamic_parameters
                    .insert(field.clone(), Value::String(resolved));
            }
            tracing::info!(
                signature = self.state.signature.as_str(),
                "Merged refreshed credential into dynamic parameters"
            );
        }
        Ok(())
    }

    fn build_request(&self) -> PullRequest {
        let parameters = self.state.dynamic_parameters.clone();
        let rendered = self
            .config
            .source
            .template
            .as_ref()
            .map(|t| template::substitute(t, &parameters).0);
        PullRequest {
            rendered,
            parameters,
            signature: self.state.signature.clone(),
        }
    }

    /// Variable values for the upcoming call: watermark bounds,
    /// pagination counters, and the current session value.
    fn variables(&self) -> Map<String, Value> {
        let mut vars = Map::new();
        vars.insert(
            PARAM_WATERMARK.to_string(),
            json!({
                "low": self.item.low_watermark,
                "high": self.item.expected_high_watermark,
            }),
        );
        if self.config.pagination.enabled {
            vars.insert(PARAM_PAGESTART.to_string(), json!(self.page_start));
            vars.insert(PARAM_PAGESIZE.to_string(), json!(self.page_size));
            vars.insert(PARAM_PAGENO.to_string(), json!(self.page_number));
        }
        let session = if self.state.session_key_value.is_empty() {
            self.config.session.initial_value.clone().unwrap_or_default()
        } else {
            self.state.session_key_value.clone()
        };
        if self.config.session.enabled() || !session.is_empty() {
            vars.insert(PARAM_SESSION.to_string(), json!(session));
        }
        vars
    }

    /// Recompute the dynamic parameters: defined parameters resolved
    /// against the variable values, overlaid with activation parameters
    /// and refreshed credentials.
    fn rebuild_parameters(&mut self) {
        let vars = self.variables();
        let mut params = Map::new();
        for (name, value) in &self.config.source.parameters {
            params.insert(name.clone(), resolve_value(value, &vars));
        }

        // Parameters may reference sibling parameters; `tmp`-prefixed
        // entries exist only as substitution feedstock and are dropped
        // once consumed.
        let snapshot = params.clone();
        let mut consumed_tmp: HashSet<String> = HashSet::new();
        for (name, value) in &mut params {
            if let Value::String(text) = value {
                if text.contains("{{") {
                    let (resolved, remaining) = template::substitute(text, &snapshot);
                    for key in snapshot.keys() {
                        if key.starts_with("tmp") && key != name && !remaining.contains_key(key) {
                            consumed_tmp.insert(key.clone());
                        }
                    }
                    *value = Value::String(resolved);
                }
            }
        }
        for key in consumed_tmp {
            params.remove(&key);
        }

        for (key, value) in &self.state.activation_parameters {
            params.insert(key.clone(), value.clone());
        }
        for (key, value) in &self.credential_overrides {
            params.insert(key.clone(), value.clone());
        }
        for (key, value) in vars {
            params.entry(key).or_insert(value);
        }
        self.state.dynamic_parameters = params;
    }

    /// Advance pagination counters for the next call. The transport's
    /// reported page size is adopted when present; the driver owns the
    /// start offset and page number.
    fn advance_pagination(&mut self) {
        if self.status.page_size > 0 {
            self.page_size = self.status.page_size;
        }
        self.page_start += self.page_size;
        self.page_number += 1;
    }

    /// Fold a call's result into the execution state. Side-channel
    /// extraction failures leave fields empty without failing the item.
    fn absorb(&mut self, result: PullResult) {
        if let Some(field) = &self.config.session.key_field {
            let value = if result.session_key.is_empty() {
                result.header(field).unwrap_or_default()
            } else {
                result.session_key.clone()
            };
            if value.is_empty() {
                tracing::debug!(
                    signature = self.state.signature.as_str(),
                    field = field.as_str(),
                    "No session key in response"
                );
            }
            self.state.session_key_value = value;
        } else if !result.session_key.is_empty() {
            self.state.session_key_value = result.session_key.clone();
        }

        if self.item.output_schema.is_none() && self.state.inferred_schema.is_none() {
            if let Some(schema) = result.schema() {
                self.state.inferred_schema = Some(schema.to_string());
            }
        }

        self.status = result;
    }

    /// Decide whether the loop is done, evaluated after each successful
    /// call.
    fn check_termination(
        &self,
        ever_buffered: bool,
        new_records: u64,
    ) -> Result<Flow, SourceError> {
        // No buffer was ever produced: nothing to pull.
        if !ever_buffered {
            return Ok(Flow::Done);
        }

        // Cumulative count reached the source-advertised total.
        if self.config.total_count_field.is_some()
            && self.status.total_count > 0
            && self.state.processed_count >= self.status.total_count
        {
            return Ok(Flow::Done);
        }

        if let Some(fail_re) = &self.fail_re {
            if fail_re.is_match(&self.state.session_key_value) {
                return Err(SourceError::data(
                    "SESSION_FAIL_CONDITION",
                    format!(
                        "session fail condition met: '{}'",
                        self.state.session_key_value
                    ),
                ));
            }
        }

        // A configured stop condition governs pagination; zero-record
        // pages keep polling until it matches or the session times out.
        if let Some(stop_re) = &self.stop_re {
            if stop_re.is_match(&self.state.session_key_value) {
                return Ok(Flow::Done);
            }
            if let Some(started) = self.started {
                if started.elapsed() > self.config.session.timeout() {
                    return Err(SourceError::internal(
                        "SESSION_TIMEOUT",
                        format!(
                            "session timed out after {}s before the stop condition was met",
                            self.config.session.timeout_seconds
                        ),
                    ));
                }
            }
            return Ok(Flow::Continue);
        }

        // A call yielding zero new records ends pagination.
        if new_records == 0 {
            return Ok(Flow::Done);
        }

        // Without pagination there is nothing further to request.
        if !self.config.pagination.enabled && self.config.total_count_field.is_none() {
            return Ok(Flow::Done);
        }
        Ok(Flow::Continue)
    }
}

fn compile_condition(pattern: Option<&str>) -> Result<Option<Regex>, SourceError> {
    pattern
        .map(|p| {
            Regex::new(p).map_err(|e| {
                SourceError::config(
                    "INVALID_SESSION_REGEX",
                    format!("session condition '{p}' is not a valid regex: {e}"),
                )
            })
        })
        .transpose()
}

fn resolve_value(value: &Value, vars: &Map<String, Value>) -> Value {
    match value {
        Value::String(text) if text.contains("{{") => {
            let (resolved, _) = template::substitute(text, vars);
            Value::String(resolved)
        }
        other => other.clone(),
    }
}
