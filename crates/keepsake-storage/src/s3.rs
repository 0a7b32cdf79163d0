use crate::keys::validate_address;
use crate::traits::{BlobReader, BlobStore, StorageError, StorageResult, UploadReceipt};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStoreExt, PutPayload, Result as ObjectResult};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;

/// S3 blob store.
///
/// All owners share one physical bucket; an owner's bucket becomes the first path
/// segment of every object key (`{bucket}/{key}`). Prefixes need no creation, so
/// provisioning is implicit and first uploads for an owner cannot race.
#[derive(Clone)]
pub struct S3BlobStore {
    store: AmazonS3,
    bucket: String,
}

impl S3BlobStore {
    /// Create a new S3BlobStore instance
    ///
    /// # Arguments
    /// * `bucket` - Physical S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    pub async fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(S3BlobStore { store, bucket })
    }

    fn location(key: &str, bucket: &str) -> StorageResult<Path> {
        validate_address(key, bucket)?;
        Ok(Path::from(format!("{}/{}", bucket, key)))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[tracing::instrument(skip(self, reader), fields(storage.backend = "s3"))]
    async fn upload(
        &self,
        key: &str,
        bucket: &str,
        mut reader: BlobReader,
    ) -> StorageResult<UploadReceipt> {
        let location = Self::location(key, bucket)?;
        let start = std::time::Instant::now();

        // object_store takes a single payload; buffer the stream before the put.
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to read from stream: {}", e))
        })?;

        let size = buffer.len() as u64;
        let payload = PutPayload::from(Bytes::from(buffer));

        let result: ObjectResult<_> = self.store.put(&location, payload).await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %location,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 upload failed"
            );
            StorageError::UploadFailed(e.to_string())
        })?;

        let created_at = match self.store.head(&location).await {
            Ok(meta) => meta.last_modified,
            Err(e) => {
                tracing::warn!(error = %e, key = %location, "S3 head after upload failed");
                Utc::now()
            }
        };

        tracing::info!(
            bucket = %self.bucket,
            key = %location,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(UploadReceipt {
            size: size as i64,
            created_at,
        })
    }

    async fn download(&self, key: &str, bucket: &str) -> StorageResult<BlobReader> {
        let location = Self::location(key, bucket)?;
        let start = std::time::Instant::now();

        let result: ObjectResult<_> = self.store.get(&location).await;

        let result = result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => {
                StorageError::NotFound(format!("{}/{}", bucket, key))
            }
            other => {
                tracing::error!(
                    error = %other,
                    bucket = %self.bucket,
                    key = %location,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 download failed"
                );
                StorageError::DownloadFailed(other.to_string())
            }
        })?;

        let stream = result
            .into_stream()
            .map_err(|e| std::io::Error::other(e.to_string()));

        Ok(Box::pin(StreamReader::new(stream)))
    }

    #[tracing::instrument(skip(self), fields(storage.backend = "s3"))]
    async fn delete(&self, key: &str, bucket: &str) -> StorageResult<()> {
        let location = Self::location(key, bucket)?;
        let start = std::time::Instant::now();

        let result: ObjectResult<_> = self.store.delete(&location).await;

        match result {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %location,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                return Err(StorageError::DeleteFailed(e.to_string()));
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %location,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
