//! Batch ingestion.
//!
//! Each asset of a batch runs through its own state machine on its own task:
//!
//! ```text
//! duplicate check -> derivative (upload, save) -> original upload -> original save
//! ```
//!
//! A failing derivative never fails the asset. A failing original save rolls back
//! everything the asset committed; a rollback that cannot complete is escalated as
//! `FailureReason::CriticalRollbackFailed` naming the orphaned objects.

mod context;
mod orchestrator;
mod report;

pub use context::{InboundPart, IngestSettings, PendingAsset};
pub use orchestrator::{IngestError, IngestService};
pub use report::{BatchReport, BatchStatus, ItemFailure, ReportEntry, Severity};
