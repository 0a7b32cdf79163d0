use async_trait::async_trait;
use keepsake_core::{Asset, Owner};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    /// A record with the same `(owner, id)` already exists.
    #[error("Asset already exists: {0}")]
    Conflict(String),

    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Metadata backend error: {0}")]
    Backend(String),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Persistence for asset records.
///
/// Every lookup is scoped to an owner; an id belonging to someone else is reported as
/// `NotFound`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new record. Fails with `Conflict` when `(owner, id)` is taken.
    async fn create(&self, asset: &Asset) -> MetadataResult<()>;

    async fn get(&self, id: &str, owner: &Owner) -> MetadataResult<Asset>;

    /// First record of `owner` with the given display name.
    async fn get_by_name(&self, name: &str, owner: &Owner) -> MetadataResult<Asset>;

    /// All records of `owner`, originals and derivatives, newest first.
    async fn get_all(&self, owner: &Owner) -> MetadataResult<Vec<Asset>>;

    /// Remove a record. Removing a missing record succeeds.
    async fn delete(&self, id: &str, owner: &Owner) -> MetadataResult<()>;
}
