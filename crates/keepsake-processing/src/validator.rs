//! Checks applied to inbound parts before anything touches the disk.

use keepsake_core::MediaKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid content type: {0} (only image/* and video/* are accepted)")]
    InvalidContentType(String),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),
}

/// Accept only `image/*` and `video/*`, returning the media family.
pub fn validate_content_type(content_type: &str) -> Result<MediaKind, ValidationError> {
    match MediaKind::from_content_type(content_type) {
        MediaKind::Other => Err(ValidationError::InvalidContentType(
            content_type.to_string(),
        )),
        kind => Ok(kind),
    }
}

/// Reduce a client-supplied file name to its base name.
///
/// Both `/` and `\` count as separators; names that reduce to nothing (or to `.`/`..`)
/// are rejected.
pub fn sanitize_filename(name: &str) -> Result<String, ValidationError> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .replace('\0', "");

    if base.is_empty() || base == "." || base == ".." {
        return Err(ValidationError::InvalidFilename(name.to_string()));
    }

    Ok(base)
}
