//! Owner-scoped listing, download and deletion of committed assets.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use keepsake_core::{Asset, FailureReason, Owner};
use keepsake_db::{MetadataError, MetadataStore};
use keepsake_storage::{BlobReader, BlobStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Asset {0} has no preview")]
    NoDerivative(String),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Deleting {id} failed: {}", .errors.join("; "))]
    DeleteFailed { id: String, errors: Vec<String> },
}

impl MediaError {
    /// Per-item reason used in batch delete results.
    pub fn to_failure(&self) -> FailureReason {
        match self {
            MediaError::NotFound(id) => FailureReason::NotFound(id.clone()),
            MediaError::Metadata(MetadataError::NotFound(id)) => {
                FailureReason::NotFound(id.clone())
            }
            other => FailureReason::DeleteFailed(other.to_string()),
        }
    }
}

async fn within<T, E, F>(limit: Duration, fut: F) -> Result<T, MediaError>
where
    F: Future<Output = Result<T, E>>,
    MediaError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(MediaError::from),
        Err(_) => Err(MediaError::TimedOut(limit)),
    }
}

#[derive(Clone)]
pub struct MediaService {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    metadata_timeout: Duration,
    blob_timeout: Duration,
}

impl MediaService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        metadata_timeout: Duration,
        blob_timeout: Duration,
    ) -> Self {
        Self {
            metadata,
            blobs,
            metadata_timeout,
            blob_timeout,
        }
    }

    async fn lookup(&self, owner: &Owner, id: &str) -> Result<Asset, MediaError> {
        match within(self.metadata_timeout, self.metadata.get(id, owner)).await {
            Err(MediaError::Metadata(MetadataError::NotFound(_))) => {
                Err(MediaError::NotFound(id.to_string()))
            }
            other => other,
        }
    }

    /// The owner's originals, newest first. Previews are not listed.
    #[tracing::instrument(skip_all, fields(owner.id = %owner.id))]
    pub async fn list(&self, owner: &Owner) -> Result<Vec<Asset>, MediaError> {
        let assets = within(self.metadata_timeout, self.metadata.get_all(owner)).await?;
        Ok(assets
            .into_iter()
            .filter(|asset| !asset.is_derivative())
            .collect())
    }

    /// Look an asset up by its file name.
    #[tracing::instrument(skip(self, owner), fields(owner.id = %owner.id))]
    pub async fn find_by_name(&self, owner: &Owner, name: &str) -> Result<Asset, MediaError> {
        match within(self.metadata_timeout, self.metadata.get_by_name(name, owner)).await {
            Err(MediaError::Metadata(MetadataError::NotFound(_))) => {
                Err(MediaError::NotFound(name.to_string()))
            }
            other => other,
        }
    }

    #[tracing::instrument(skip(self, owner), fields(owner.id = %owner.id))]
    pub async fn download(
        &self,
        owner: &Owner,
        id: &str,
    ) -> Result<(Asset, BlobReader), MediaError> {
        let asset = self.lookup(owner, id).await?;
        let reader = within(
            self.blob_timeout,
            self.blobs.download(&asset.id, &owner.bucket),
        )
        .await?;
        Ok((asset, reader))
    }

    /// Stream the preview of asset `id`.
    #[tracing::instrument(skip(self, owner), fields(owner.id = %owner.id))]
    pub async fn download_derivative(
        &self,
        owner: &Owner,
        id: &str,
    ) -> Result<(Asset, BlobReader), MediaError> {
        let asset = self.lookup(owner, id).await?;
        let derivative_id = asset
            .derivative_id
            .ok_or_else(|| MediaError::NoDerivative(id.to_string()))?;
        self.download(owner, &derivative_id).await
    }

    /// Remove one blob, then its record. The record stays when the blob delete fails.
    async fn remove(&self, owner: &Owner, target: &str) -> Result<(), String> {
        within(self.blob_timeout, self.blobs.delete(target, &owner.bucket))
            .await
            .map_err(|e| format!("blob {}: {}", target, e))?;
        within(self.metadata_timeout, self.metadata.delete(target, owner))
            .await
            .map_err(|e| format!("record {}: {}", target, e))
    }

    /// Delete an asset, then its preview.
    ///
    /// The preview is only touched once the original's record is gone, so a surviving
    /// original never points at a deleted preview. Every failure is collected.
    #[tracing::instrument(skip(self, owner), fields(owner.id = %owner.id))]
    pub async fn delete(&self, owner: &Owner, id: &str) -> Result<(), MediaError> {
        let asset = self.lookup(owner, id).await?;

        let mut errors = Vec::new();
        match self.remove(owner, &asset.id).await {
            Ok(()) => {
                if let Some(derivative_id) = &asset.derivative_id {
                    if let Err(e) = self.remove(owner, derivative_id).await {
                        errors.push(e);
                    }
                }
            }
            Err(e) => errors.push(e),
        }

        if errors.is_empty() {
            tracing::info!(asset.id = %id, "Asset deleted");
            Ok(())
        } else {
            tracing::error!(asset.id = %id, errors = ?errors, "Asset delete incomplete");
            Err(MediaError::DeleteFailed {
                id: id.to_string(),
                errors,
            })
        }
    }

    /// Delete several assets concurrently, one task per id.
    ///
    /// Returns the ids that could not be deleted, with the reason.
    #[tracing::instrument(skip_all, fields(owner.id = %owner.id, count = ids.len()))]
    pub async fn delete_batch(
        &self,
        owner: &Owner,
        ids: Vec<String>,
    ) -> Vec<(String, FailureReason)> {
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            let service = self.clone();
            let owner = owner.clone();
            let task_id = id.clone();
            let handle = tokio::spawn(async move { service.delete(&owner, &task_id).await });
            handles.push((id, handle));
        }

        let mut failures = Vec::new();
        for (id, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push((id, e.to_failure())),
                Err(join_err) => {
                    failures.push((id, FailureReason::WorkerAborted(join_err.to_string())))
                }
            }
        }
        failures
    }
}
