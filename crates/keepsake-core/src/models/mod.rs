//! Domain models

pub mod asset;
pub mod owner;

pub use asset::{derivative_id_for, derivative_name_for, is_reserved_id, Asset, MediaKind};
pub use owner::Owner;
