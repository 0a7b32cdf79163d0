//! Lazy bucket provisioning.
//!
//! `BucketProvisioner` runs a backend's create-if-absent action at most once per bucket at
//! a time, behind a per-bucket async lock. Buckets known to exist are cached and skip the
//! lock.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::Mutex as AsyncMutex;

use crate::traits::{StorageError, StorageResult};

#[derive(Default)]
pub struct BucketProvisioner {
    ready: RwLock<HashSet<String>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl BucketProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `bucket` has already been provisioned by this process.
    pub fn is_ready(&self, bucket: &str) -> bool {
        self.ready
            .read()
            .map(|ready| ready.contains(bucket))
            .unwrap_or(false)
    }

    /// Make sure `bucket` exists, calling `create` only if this process has not yet
    /// provisioned it. `create` must be idempotent: another process may have created
    /// the bucket in the meantime.
    pub async fn ensure<F, Fut>(&self, bucket: &str, create: F) -> StorageResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StorageResult<()>>,
    {
        if self.is_ready(bucket) {
            return Ok(());
        }

        let lock = self.lock_for(bucket)?;
        let _guard = lock.lock().await;

        // Another task may have finished provisioning while we waited for the lock.
        if self.is_ready(bucket) {
            return Ok(());
        }

        create().await?;

        self.ready
            .write()
            .map_err(|_| StorageError::ProvisioningFailed("provisioner state poisoned".into()))?
            .insert(bucket.to_string());

        tracing::info!(bucket = %bucket, "Bucket provisioned");
        Ok(())
    }

    fn lock_for(&self, bucket: &str) -> StorageResult<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StorageError::ProvisioningFailed("provisioner state poisoned".into()))?;
        Ok(locks
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }
}
