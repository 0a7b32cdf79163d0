//! Keepsake metadata store
//!
//! The `MetadataStore` trait the ingestion core writes asset records through, plus an
//! in-process implementation and a Postgres implementation backed by sqlx.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod store;

pub use memory::MemoryMetadataStore;
#[cfg(feature = "postgres")]
pub use postgres::{connect, PgMetadataStore};
pub use store::{MetadataError, MetadataResult, MetadataStore};
