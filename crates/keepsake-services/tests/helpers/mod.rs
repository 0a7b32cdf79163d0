//! Shared fixtures for ingestion and media tests: in-memory stores with fault
//! injection, image fixtures and a service harness.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use image::{ImageFormat, Rgb, RgbImage};
use keepsake_core::{Asset, Owner};
use keepsake_db::{MemoryMetadataStore, MetadataError, MetadataResult, MetadataStore};
use keepsake_processing::{
    Derivative, DerivativeError, DerivativeGenerator, DerivativeSettings, PreviewGenerator, Stager,
};
use keepsake_services::{InboundPart, IngestService, IngestSettings, MediaService};
use keepsake_storage::{
    BlobReader, BlobStore, StorageBackend, StorageError, StorageResult, UploadReceipt,
};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

pub fn owner() -> Owner {
    Owner::from_email("owner-1", "Jane.Doe@example.com")
}

pub fn other_owner() -> Owner {
    Owner::from_email("owner-2", "john@example.com")
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Png)
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Jpeg)
}

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 255) as u8, (y % 255) as u8, 90]));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), format).unwrap();
    buffer
}

pub fn reader(bytes: Vec<u8>) -> BlobReader {
    Box::pin(Cursor::new(bytes))
}

pub fn part(name: &str, content_type: &str, bytes: Vec<u8>) -> InboundPart {
    InboundPart::new(name, content_type, reader(bytes))
}

pub async fn read_all(mut reader: BlobReader) -> Vec<u8> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    out
}

/// Blob store kept in memory, with per-key failure injection.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    fail_upload: Mutex<HashSet<String>>,
    fail_delete: Mutex<HashSet<String>>,
    stall_delete: Mutex<HashSet<String>>,
}

impl MemoryBlobStore {
    pub fn fail_upload_of(&self, key: &str) {
        self.fail_upload.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_delete_of(&self, key: &str) {
        self.fail_delete.lock().unwrap().insert(key.to_string());
    }

    /// Deletes of `key` hang far past any test timeout.
    pub fn stall_delete_of(&self, key: &str) {
        self.stall_delete.lock().unwrap().insert(key.to_string());
    }

    pub fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), bytes);
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        key: &str,
        bucket: &str,
        mut reader: BlobReader,
    ) -> StorageResult<UploadReceipt> {
        if self.fail_upload.lock().unwrap().contains(key) {
            return Err(StorageError::UploadFailed(format!("injected failure for {}", key)));
        }

        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await?;
        let size = bytes.len() as i64;
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), bytes);

        Ok(UploadReceipt {
            size,
            created_at: Utc::now(),
        })
    }

    async fn download(&self, key: &str, bucket: &str) -> StorageResult<BlobReader> {
        self.get(bucket, key)
            .map(reader)
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn delete(&self, key: &str, bucket: &str) -> StorageResult<()> {
        if self.fail_delete.lock().unwrap().contains(key) {
            return Err(StorageError::DeleteFailed(format!("injected failure for {}", key)));
        }
        let stalled = self.stall_delete.lock().unwrap().contains(key);
        if stalled {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

/// Memory metadata store with per-id failure injection.
#[derive(Default)]
pub struct FaultyMetadataStore {
    pub inner: MemoryMetadataStore,
    fail_create: Mutex<HashSet<String>>,
    fail_delete: Mutex<HashSet<String>>,
    stall_create: Mutex<HashSet<String>>,
}

impl FaultyMetadataStore {
    pub fn fail_create_of(&self, id: &str) {
        self.fail_create.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_delete_of(&self, id: &str) {
        self.fail_delete.lock().unwrap().insert(id.to_string());
    }

    /// Creates of `id` are written, then never acknowledged.
    pub fn stall_create_of(&self, id: &str) {
        self.stall_create.lock().unwrap().insert(id.to_string());
    }

    pub async fn exists(&self, id: &str, owner: &Owner) -> bool {
        self.inner.get(id, owner).await.is_ok()
    }
}

#[async_trait]
impl MetadataStore for FaultyMetadataStore {
    async fn create(&self, asset: &Asset) -> MetadataResult<()> {
        if self.fail_create.lock().unwrap().contains(&asset.id) {
            return Err(MetadataError::Backend(format!(
                "injected failure for {}",
                asset.id
            )));
        }
        let stalled = self.stall_create.lock().unwrap().contains(&asset.id);
        self.inner.create(asset).await?;
        if stalled {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(())
    }

    async fn get(&self, id: &str, owner: &Owner) -> MetadataResult<Asset> {
        self.inner.get(id, owner).await
    }

    async fn get_by_name(&self, name: &str, owner: &Owner) -> MetadataResult<Asset> {
        self.inner.get_by_name(name, owner).await
    }

    async fn get_all(&self, owner: &Owner) -> MetadataResult<Vec<Asset>> {
        self.inner.get_all(owner).await
    }

    async fn delete(&self, id: &str, owner: &Owner) -> MetadataResult<()> {
        if self.fail_delete.lock().unwrap().contains(id) {
            return Err(MetadataError::Backend(format!("injected failure for {}", id)));
        }
        self.inner.delete(id, owner).await
    }
}

/// Panics while generating the preview of the asset called `poison`.
pub struct PanickingGenerator {
    pub inner: PreviewGenerator,
    pub poison: String,
}

#[async_trait]
impl DerivativeGenerator for PanickingGenerator {
    async fn generate(
        &self,
        cancel: &CancellationToken,
        asset: &Asset,
        staged_path: &Path,
    ) -> Result<Option<Derivative>, DerivativeError> {
        if asset.name == self.poison {
            panic!("preview generator exploded on {}", asset.name);
        }
        self.inner.generate(cancel, asset, staged_path).await
    }
}

pub fn preview_generator() -> PreviewGenerator {
    PreviewGenerator::new(DerivativeSettings::default()).unwrap()
}

/// Writes an executable shell script standing in for ffmpeg.
#[cfg(unix)]
pub fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-ffmpeg");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Ingest and media services wired to in-memory stores and a private staging root.
pub struct Harness {
    pub ingest: IngestService,
    pub media: MediaService,
    pub metadata: Arc<FaultyMetadataStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_generator(Arc::new(preview_generator()))
    }

    pub fn with_generator(generator: Arc<dyn DerivativeGenerator>) -> Self {
        Self::build(generator, IngestSettings::default())
    }

    pub fn build(generator: Arc<dyn DerivativeGenerator>, settings: IngestSettings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let metadata = Arc::new(FaultyMetadataStore::default());
        let blobs = Arc::new(MemoryBlobStore::default());

        let ingest = IngestService::new(
            metadata.clone(),
            blobs.clone(),
            generator,
            Stager::new(dir.path().join("staging")),
            settings,
        );
        let media = MediaService::new(
            metadata.clone(),
            blobs.clone(),
            Duration::from_secs(5),
            Duration::from_secs(1),
        );

        Self {
            ingest,
            media,
            metadata,
            blobs,
            dir,
        }
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.dir.path().join("staging")
    }

    /// Files left under the staging root.
    pub fn residual_staged_files(&self) -> usize {
        std::fs::read_dir(self.staging_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
