//! Blob storage abstraction trait
//!
//! This module defines the `BlobStore` trait that all storage backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Invalid bucket name: {0}")]
    InvalidBucket(String),

    #[error("Bucket provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Streaming reader handed to and returned by blob stores.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// What the backend reports after committing a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Stored size in bytes
    pub size: i64,
    /// When the backend committed the object
    pub created_at: DateTime<Utc>,
}

/// Blob storage abstraction trait
///
/// All storage backends (local filesystem, S3) implement this trait so the ingestion
/// pipeline never couples to a transport.
///
/// Implementations must provision `bucket` on first use and must serialize that
/// provisioning themselves (see [`BucketProvisioner`](crate::BucketProvisioner)).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stream `reader` to `(bucket, key)` until EOF, replacing any existing object.
    async fn upload(
        &self,
        key: &str,
        bucket: &str,
        reader: BlobReader,
    ) -> StorageResult<UploadReceipt>;

    /// Open `(bucket, key)` for streaming reads.
    async fn download(&self, key: &str, bucket: &str) -> StorageResult<BlobReader>;

    /// Delete `(bucket, key)`. Deleting a missing object succeeds.
    async fn delete(&self, key: &str, bucket: &str) -> StorageResult<()>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
