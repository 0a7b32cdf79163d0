//! Keepsake Storage Library
//!
//! Blob storage abstraction and its implementations for the local filesystem and S3.
//!
//! # Buckets and keys
//!
//! Every owner has a bucket; every blob is addressed by `(bucket, key)` where the key is
//! the asset id. Buckets are provisioned lazily on first upload. Provisioning is
//! serialized per bucket inside the store, so concurrent first uploads for the same owner
//! never race each other into spurious conflicts.
//!
//! Bucket names and keys are validated by the `keys` module before any backend sees
//! them; keys must not contain `..`, path separators or a leading `/`.

pub mod factory;
pub(crate) mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod provision;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_blob_store;
pub use keepsake_core::StorageBackend;
#[cfg(feature = "storage-local")]
pub use local::LocalBlobStore;
pub use provision::BucketProvisioner;
#[cfg(feature = "storage-s3")]
pub use s3::S3BlobStore;
pub use traits::{BlobReader, BlobStore, StorageError, StorageResult, UploadReceipt};
