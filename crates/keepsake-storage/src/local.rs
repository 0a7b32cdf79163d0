use crate::keys::validate_address;
use crate::provision::BucketProvisioner;
use crate::traits::{BlobReader, BlobStore, StorageError, StorageResult, UploadReceipt};
use crate::StorageBackend;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local filesystem blob store: one directory per bucket under `base_path`.
#[derive(Clone)]
pub struct LocalBlobStore {
    base_path: PathBuf,
    provisioner: Arc<BucketProvisioner>,
}

impl LocalBlobStore {
    /// Create a new LocalBlobStore instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory holding one sub-directory per bucket
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalBlobStore {
            base_path,
            provisioner: Arc::new(BucketProvisioner::new()),
        })
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Convert a validated blob address to its filesystem path
    fn blob_path(&self, key: &str, bucket: &str) -> StorageResult<PathBuf> {
        validate_address(key, bucket)?;
        Ok(self.bucket_path(bucket).join(key))
    }

    /// Create the bucket directory if absent; serialized per bucket.
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        let path = self.bucket_path(bucket);
        self.provisioner
            .ensure(bucket, || async move {
                fs::create_dir_all(&path).await.map_err(|e| {
                    StorageError::ProvisioningFailed(format!(
                        "Failed to create bucket directory {}: {}",
                        path.display(),
                        e
                    ))
                })
            })
            .await
    }

    /// Partial uploads land next to the final path and are renamed into place.
    fn partial_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.partial", name))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    #[tracing::instrument(skip(self, reader), fields(storage.backend = "local"))]
    async fn upload(
        &self,
        key: &str,
        bucket: &str,
        mut reader: BlobReader,
    ) -> StorageResult<UploadReceipt> {
        let path = self.blob_path(key, bucket)?;
        self.ensure_bucket(bucket).await?;

        let start = std::time::Instant::now();
        let partial = Self::partial_path(&path);

        let mut file = fs::File::create(&partial).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", partial.display(), e))
        })?;

        let copied = tokio::io::copy(&mut reader, &mut file).await;
        let bytes_copied = match copied {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&partial).await;
                return Err(StorageError::UploadFailed(format!(
                    "Failed to write stream to file {}: {}",
                    partial.display(),
                    e
                )));
            }
        };

        file.flush().await?;
        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", partial.display(), e))
        })?;
        drop(file);

        fs::rename(&partial, &path).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to move {} into place: {}",
                partial.display(),
                e
            ))
        })?;

        tracing::info!(
            path = %path.display(),
            bucket = %bucket,
            key = %key,
            size_bytes = bytes_copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(UploadReceipt {
            size: bytes_copied as i64,
            created_at: Utc::now(),
        })
    }

    async fn download(&self, key: &str, bucket: &str) -> StorageResult<BlobReader> {
        let path = self.blob_path(key, bucket)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(format!("{}/{}", bucket, key)));
        }

        let file = fs::File::open(&path).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to open file {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = %path.display(), bucket = %bucket, key = %key, "Local storage download opened");

        Ok(Box::pin(file))
    }

    #[tracing::instrument(skip(self), fields(storage.backend = "local"))]
    async fn delete(&self, key: &str, bucket: &str) -> StorageResult<()> {
        let path = self.blob_path(key, bucket)?;
        let start = std::time::Instant::now();

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_file(&path).await.map_err(|e| {
            StorageError::DeleteFailed(format!("Failed to delete file {}: {}", path.display(), e))
        })?;

        tracing::info!(
            path = %path.display(),
            bucket = %bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
