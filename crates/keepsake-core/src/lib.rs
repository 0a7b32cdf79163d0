//! Keepsake Core Library
//!
//! Domain models, the per-item failure taxonomy and configuration shared by every
//! Keepsake crate. Nothing in here performs I/O besides reading the environment.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::KeepsakeConfig;
pub use error::{ErrorMetadata, FailureReason, LogLevel};
pub use models::{
    derivative_id_for, derivative_name_for, is_reserved_id, Asset, MediaKind, Owner,
};
pub use storage_types::StorageBackend;
