use keepsake_core::{ErrorMetadata, FailureReason};
use serde::Serialize;

/// Overall outcome of a batch, mirroring HTTP 201 / 207.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Created,
    MultiStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The item was not committed, or committed with orphans left behind.
    Failure,
    /// The item was committed without its preview.
    Warning,
}

/// A per-item problem, keyed by the client's file name.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub name: String,
    pub asset_id: Option<String>,
    pub reason: FailureReason,
}

/// Serializable view of an [`ItemFailure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    pub severity: Severity,
    pub code: &'static str,
    pub reason: String,
    /// Whether resubmitting the item can succeed.
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<&'static str>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Ids of committed originals, in batch order.
    pub committed: Vec<String>,
    pub failures: Vec<ItemFailure>,
    pub warnings: Vec<ItemFailure>,
}

impl BatchReport {
    pub fn status(&self) -> BatchStatus {
        if self.failures.is_empty() {
            BatchStatus::Created
        } else {
            BatchStatus::MultiStatus
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn fail(&mut self, name: &str, asset_id: Option<&str>, reason: FailureReason) {
        self.failures.push(ItemFailure {
            name: name.to_string(),
            asset_id: asset_id.map(str::to_string),
            reason,
        });
    }

    pub(crate) fn warn(&mut self, name: &str, asset_id: Option<&str>, reason: FailureReason) {
        self.warnings.push(ItemFailure {
            name: name.to_string(),
            asset_id: asset_id.map(str::to_string),
            reason,
        });
    }

    /// Append `other`, keeping this report's entries first.
    pub(crate) fn merge(&mut self, other: BatchReport) {
        self.committed.extend(other.committed);
        self.failures.extend(other.failures);
        self.warnings.extend(other.warnings);
    }

    pub fn failure(&self, name: &str) -> Option<&FailureReason> {
        self.failures
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.reason)
    }

    pub fn warning(&self, name: &str) -> Option<&FailureReason> {
        self.warnings
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.reason)
    }

    /// Failures followed by warnings.
    pub fn entries(&self) -> Vec<ReportEntry> {
        let failures = self.failures.iter().map(|f| (f, Severity::Failure));
        let warnings = self.warnings.iter().map(|f| (f, Severity::Warning));
        failures
            .chain(warnings)
            .map(|(item, severity)| ReportEntry {
                name: item.name.clone(),
                asset_id: item.asset_id.clone(),
                severity,
                code: item.reason.error_code(),
                reason: item.reason.to_string(),
                recoverable: item.reason.is_recoverable(),
                suggested_action: item.reason.suggested_action(),
            })
            .collect()
    }
}
