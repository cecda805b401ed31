//! The protocol-agnostic connection capability and its collaborators.
//!
//! Transport implementations (HTTP, JDBC, file systems, object storage)
//! live outside this crate; the pull state machine drives whatever
//! satisfies [`Connection`]. One connection instance is bound per work
//! item, built by a [`ConnectionFactory`].

use async_trait::async_trait;
use inlet_types::{CallError, PullResult, WorkItem};
use serde_json::{Map, Value};

/// Everything a transport needs to issue one call: the work-item-scoped
/// string with variables already substituted, the current dynamic
/// parameters, and the item signature for logging.
#[derive(Debug, Clone, Default)]
pub struct PullRequest {
    /// Rendered endpoint path / statement string, when one is configured.
    pub rendered: Option<String>,
    /// Snapshot of the dynamic parameters backing this call.
    pub parameters: Map<String, Value>,
    pub signature: String,
}

/// Capability set a transport must provide to be driven by the pull
/// state machine.
///
/// `execute_first` issues the initial call of a work item;
/// `execute_next` issues each paginated follow-up. `Ok(None)` is the
/// "absent" outcome: no further data, treated as a normal, non-failing
/// end (e.g. a warning-level response). Both may raise
/// [`CallError::RetriableAuth`] to request a credential refresh.
///
/// `close_stream` releases per-call resources, `close_all` shared or
/// pooled resources. Both must be idempotent: calling either multiple
/// times, or before anything was opened, must not fail.
#[async_trait]
pub trait Connection {
    async fn execute_first(
        &mut self,
        request: &PullRequest,
        prior: &PullResult,
    ) -> Result<Option<PullResult>, CallError>;

    async fn execute_next(
        &mut self,
        request: &PullRequest,
        prior: &PullResult,
    ) -> Result<Option<PullResult>, CallError>;

    fn close_stream(&mut self) -> bool {
        true
    }

    fn close_all(&mut self, _message: &str) -> bool {
        true
    }
}

/// Binds one [`Connection`] per work item, selected by configuration.
pub trait ConnectionFactory: Send + Sync {
    /// Open a connection for the given work item.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport cannot be constructed; the
    /// item fails without a pull attempt.
    fn connect(&self, item: &WorkItem) -> anyhow::Result<Box<dyn Connection + Send>>;
}

/// Resolves opaque credential strings when merging authentication
/// records. The core treats credentials as opaque; implementations may
/// decrypt, look up a vault, or pass through.
pub trait SecretResolver: Send + Sync {
    /// Resolve a credential value to plaintext.
    ///
    /// # Errors
    ///
    /// Returns an error when the value cannot be resolved.
    fn decrypt(&self, value: &str) -> anyhow::Result<String>;
}

/// Pass-through resolver for sources whose credentials are not
/// encrypted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextSecrets;

impl SecretResolver for PlainTextSecrets {
    fn decrypt(&self, value: &str) -> anyhow::Result<String> {
        Ok(value.to_string())
    }
}
