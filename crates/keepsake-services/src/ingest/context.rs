use std::fmt;
use std::time::Duration;

use keepsake_core::{Asset, KeepsakeConfig};
use keepsake_processing::StagedFile;
use keepsake_storage::BlobReader;

/// Time limits for one batch.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub upload_timeout: Duration,
    pub metadata_timeout: Duration,
    pub rollback_timeout: Duration,
    pub batch_timeout: Duration,
}

impl IngestSettings {
    pub fn from_config(config: &KeepsakeConfig) -> Self {
        Self {
            upload_timeout: config.upload_timeout(),
            metadata_timeout: config.metadata_timeout(),
            batch_timeout: config.batch_timeout(),
            ..Self::default()
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            upload_timeout: Duration::from_secs(180),
            metadata_timeout: Duration::from_secs(5),
            rollback_timeout: Duration::from_secs(30),
            batch_timeout: Duration::from_secs(300),
        }
    }
}

/// An asset whose bytes are staged on local disk, waiting to be committed.
///
/// Dropping it removes the staged file.
#[derive(Debug)]
pub struct PendingAsset {
    pub asset: Asset,
    pub staged: StagedFile,
}

impl PendingAsset {
    pub fn new(asset: Asset, staged: StagedFile) -> Self {
        Self { asset, staged }
    }
}

/// One part of an inbound multipart upload.
pub struct InboundPart {
    /// Client-supplied file name; parts without one are ignored.
    pub file_name: Option<String>,
    pub content_type: String,
    /// Client-chosen asset id used for idempotent resubmission. A fresh UUID is assigned
    /// when absent.
    pub id: Option<String>,
    pub reader: BlobReader,
}

impl InboundPart {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        reader: BlobReader,
    ) -> Self {
        Self {
            file_name: Some(file_name.into()),
            content_type: content_type.into(),
            id: None,
            reader,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl fmt::Debug for InboundPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundPart")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
