//! Job-level error model for item and infrastructure failures.

use inlet_types::SourceError;

use crate::planner::PlanError;

/// Categorized job error.
///
/// `Source` wraps a typed [`SourceError`] raised by a connection or the
/// pull loop. `Plan` wraps a pre-flight planning failure, which aborts
/// the job before any item runs. `Infrastructure` wraps opaque host-side
/// errors (state store, secondary input I/O, task panics) that are never
/// retryable.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Source(SourceError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl JobError {
    /// Returns `true` if this is a typed source error marked retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Source(e) => e.retryable,
            Self::Plan(_) | Self::Infrastructure(_) => false,
        }
    }

    /// Returns the typed source error if this is a `Source` variant.
    #[must_use]
    pub fn as_source_error(&self) -> Option<&SourceError> {
        match self {
            Self::Source(e) => Some(e),
            Self::Plan(_) | Self::Infrastructure(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inlet_types::ErrorCategory;

    #[test]
    fn test_source_error_retryable() {
        let err = JobError::Source(SourceError::transport("CONN_RESET", "reset by peer"));
        assert!(err.is_retryable());
        let se = err.as_source_error().unwrap();
        assert_eq!(se.category, ErrorCategory::Transport);
    }

    #[test]
    fn test_source_error_not_retryable() {
        let err = JobError::Source(SourceError::config("MISSING_ENDPOINT", "required"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_plan_error_not_retryable() {
        let err = JobError::Plan(PlanError::MultipleDatetimeWatermarks);
        assert!(!err.is_retryable());
        assert!(err.as_source_error().is_none());
    }

    #[test]
    fn test_infrastructure_from_anyhow() {
        let err: JobError = anyhow::anyhow!("store unavailable").into();
        assert!(matches!(err, JobError::Infrastructure(_)));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("store unavailable"));
    }
}
