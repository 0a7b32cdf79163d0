//! Error types module
//!
//! Per-item failure taxonomy shared by the ingestion pipeline and the media service.
//! A `FailureReason` never aborts a batch: it is attached to exactly one item of the
//! batch report. Component crates keep their own error enums (storage, metadata,
//! staging, derivative) and convert into this taxonomy at the orchestrator boundary.

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected outcomes like duplicates and rejected parts
    Debug,
    /// Warning level - for recoverable issues scoped to one item
    Warn,
    /// Error level - for failures that need operator attention
    Error,
}

/// Metadata describing how a failure should be logged and reported.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "UPLOAD_FAILED")
    fn error_code(&self) -> &'static str;

    /// Whether resubmitting the same item can succeed
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the submitter
    fn suggested_action(&self) -> Option<&'static str>;

    /// Log level for this failure
    fn log_level(&self) -> LogLevel;
}

/// Why a single batch item did not reach (or only partially reached) `Committed`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FailureReason {
    #[error("content type '{0}' is not accepted; only image/* and video/* are")]
    Rejected(String),

    #[error("staging failed: {0}")]
    Io(String),

    #[error("asset id '{0}' is reserved for previews")]
    InvalidId(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("asset already exists, skipping")]
    Duplicate,

    #[error("preview generation failed: {0}")]
    DerivativeFailed(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("metadata conflict: {0}")]
    MetadataConflict(String),

    #[error("metadata save failed: {0}")]
    MetadataSaveFailed(String),

    #[error("metadata lookup failed: {0}")]
    MetadataLookupFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("delete failed: {0}")]
    DeleteFailed(String),

    #[error(
        "CRITICAL: rollback after '{cause}' left orphaned objects: {}",
        .orphans.join(", ")
    )]
    CriticalRollbackFailed { cause: String, orphans: Vec<String> },

    #[error("worker aborted: {0}")]
    WorkerAborted(String),
}

/// Static metadata for each variant: (error_code, recoverable, suggested_action, log_level).
fn failure_static_metadata(
    reason: &FailureReason,
) -> (&'static str, bool, Option<&'static str>, LogLevel) {
    match reason {
        FailureReason::Rejected(_) => (
            "UNSUPPORTED_CONTENT_TYPE",
            false,
            Some("Upload image/* or video/* content only"),
            LogLevel::Debug,
        ),
        FailureReason::Io(_) => (
            "IO_ERROR",
            true,
            Some("Retry the upload"),
            LogLevel::Warn,
        ),
        FailureReason::InvalidId(_) => (
            "INVALID_ID",
            false,
            Some("Choose an asset id without the 'thumb-' prefix"),
            LogLevel::Debug,
        ),
        FailureReason::Cancelled(_) => (
            "CANCELLED",
            true,
            Some("Retry with a smaller batch or a longer deadline"),
            LogLevel::Warn,
        ),
        FailureReason::Duplicate => ("DUPLICATE", false, None, LogLevel::Debug),
        FailureReason::DerivativeFailed(_) => (
            "DERIVATIVE_FAILED",
            true,
            Some("The original was stored; the preview can be regenerated later"),
            LogLevel::Warn,
        ),
        FailureReason::UploadFailed(_) => (
            "UPLOAD_FAILED",
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        FailureReason::MetadataConflict(_) => ("METADATA_CONFLICT", false, None, LogLevel::Debug),
        FailureReason::MetadataSaveFailed(_) => (
            "METADATA_SAVE_FAILED",
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        FailureReason::MetadataLookupFailed(_) => (
            "METADATA_LOOKUP_FAILED",
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        FailureReason::NotFound(_) => (
            "NOT_FOUND",
            false,
            Some("Verify the asset id exists"),
            LogLevel::Debug,
        ),
        FailureReason::DeleteFailed(_) => (
            "DELETE_FAILED",
            true,
            Some("Retry the delete"),
            LogLevel::Error,
        ),
        FailureReason::CriticalRollbackFailed { .. } => (
            "CRITICAL_ROLLBACK_FAILED",
            false,
            Some("Orphaned objects require operator cleanup"),
            LogLevel::Error,
        ),
        FailureReason::WorkerAborted(_) => (
            "WORKER_ABORTED",
            true,
            Some("Retry the upload"),
            LogLevel::Error,
        ),
    }
}

impl ErrorMetadata for FailureReason {
    fn error_code(&self) -> &'static str {
        failure_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        failure_static_metadata(self).1
    }

    fn suggested_action(&self) -> Option<&'static str> {
        failure_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        failure_static_metadata(self).3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_rollback_lists_orphans() {
        let reason = FailureReason::CriticalRollbackFailed {
            cause: "metadata save failed".to_string(),
            orphans: vec!["blob:b/thumb-1".to_string(), "meta:thumb-1".to_string()],
        };
        let message = reason.to_string();
        assert!(message.starts_with("CRITICAL"));
        assert!(message.contains("blob:b/thumb-1, meta:thumb-1"));
        assert_eq!(reason.error_code(), "CRITICAL_ROLLBACK_FAILED");
        assert_eq!(reason.log_level(), LogLevel::Error);
        assert!(!reason.is_recoverable());
    }

    #[test]
    fn expected_outcomes_log_at_debug() {
        assert_eq!(FailureReason::Duplicate.log_level(), LogLevel::Debug);
        assert_eq!(
            FailureReason::Rejected("application/pdf".into()).log_level(),
            LogLevel::Debug
        );
        assert_eq!(
            FailureReason::MetadataConflict("a1".into()).log_level(),
            LogLevel::Debug
        );
    }
}
