//! Keepsake services
//!
//! Batch ingestion of media assets (staging, preview derivatives, commit with
//! compensating rollback) and owner-scoped listing, download and deletion.

pub mod ingest;
pub mod media;

pub use ingest::{
    BatchReport, BatchStatus, InboundPart, IngestError, IngestService, IngestSettings,
    ItemFailure, PendingAsset, ReportEntry, Severity,
};
pub use media::{MediaError, MediaService};
