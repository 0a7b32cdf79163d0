//! Keepsake Processing Library
//!
//! Staging of inbound uploads to local disk and generation of preview derivatives.
//!
//! # Features
//!
//! - `image` - Square JPEG previews for still images (enabled by default)
//! - `video` - Single-frame JPEG previews for video via FFmpeg (enabled by default)

pub mod derivative;
pub mod staging;
pub mod validator;

pub use derivative::{
    Derivative, DerivativeError, DerivativeGenerator, DerivativeSettings, PreviewGenerator,
};
pub use staging::{StageError, StagedFile, Stager};
pub use validator::{sanitize_filename, validate_content_type, ValidationError};
