//! In-process metadata store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use keepsake_core::{Asset, Owner};
use tokio::sync::RwLock;

use crate::store::{MetadataError, MetadataResult, MetadataStore};

type RecordKey = (String, String);

/// Metadata store kept in memory, keyed by `(owner id, asset id)`.
///
/// Clones share the same records.
#[derive(Clone, Default)]
pub struct MemoryMetadataStore {
    records: Arc<RwLock<HashMap<RecordKey, Asset>>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn key(id: &str, owner: &Owner) -> RecordKey {
        (owner.id.clone(), id.to_string())
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create(&self, asset: &Asset) -> MetadataResult<()> {
        let mut records = self.records.write().await;
        let key = Self::key(&asset.id, &asset.owner);
        if records.contains_key(&key) {
            return Err(MetadataError::Conflict(asset.id.clone()));
        }
        records.insert(key, asset.clone());
        Ok(())
    }

    async fn get(&self, id: &str, owner: &Owner) -> MetadataResult<Asset> {
        self.records
            .read()
            .await
            .get(&Self::key(id, owner))
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(id.to_string()))
    }

    async fn get_by_name(&self, name: &str, owner: &Owner) -> MetadataResult<Asset> {
        self.records
            .read()
            .await
            .values()
            .filter(|asset| asset.owner.id == owner.id && asset.name == name)
            .min_by_key(|asset| asset.uploaded_at)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(name.to_string()))
    }

    async fn get_all(&self, owner: &Owner) -> MetadataResult<Vec<Asset>> {
        let mut assets: Vec<Asset> = self
            .records
            .read()
            .await
            .values()
            .filter(|asset| asset.owner.id == owner.id)
            .cloned()
            .collect();
        assets.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(assets)
    }

    async fn delete(&self, id: &str, owner: &Owner) -> MetadataResult<()> {
        self.records.write().await.remove(&Self::key(id, owner));
        Ok(())
    }
}
