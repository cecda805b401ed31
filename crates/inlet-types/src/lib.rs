//! Shared data model for the Inlet pull engine.
//!
//! Pure data types used across the planner, the pull state machine, and
//! the state store. Kept free of I/O so every crate can depend on them
//! without circular dependencies.

pub mod errors;
pub mod job;
pub mod partition;
pub mod pull;
pub mod secondary;
pub mod watermark;
pub mod work_item;

pub use errors::{CallError, ErrorCategory, ErrorCode, SourceError};
pub use job::{JobId, RunStats, RunStatus};
pub use partition::{Granularity, PartitionPlan, PartitionRange, SubRange};
pub use pull::PullResult;
pub use secondary::{RetryPolicy, SecondaryCategory, SecondaryRecords};
pub use watermark::{TimeAnchor, WatermarkDefinition, WatermarkError, WatermarkSpec};
pub use work_item::{ExecutionState, WorkItem};
