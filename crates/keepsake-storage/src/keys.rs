//! Shared bucket and key validation for storage backends.

use crate::traits::{StorageError, StorageResult};

const MAX_BUCKET_LEN: usize = 63;
const MAX_KEY_LEN: usize = 255;

/// Bucket names are 1–63 characters of `[a-z0-9-]` and may not start or end with `-`.
pub fn validate_bucket(bucket: &str) -> StorageResult<()> {
    let valid = !bucket.is_empty()
        && bucket.len() <= MAX_BUCKET_LEN
        && !bucket.starts_with('-')
        && !bucket.ends_with('-')
        && bucket
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidBucket(bucket.to_string()))
    }
}

/// Keys are single path components: no separators, no `..`, no leading dot.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(StorageError::InvalidKey(format!(
            "key length must be between 1 and {}",
            MAX_KEY_LEN
        )));
    }
    if key.contains("..") || key.contains('/') || key.contains('\\') || key.starts_with('.') {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

/// Validate both halves of a blob address.
pub fn validate_address(key: &str, bucket: &str) -> StorageResult<()> {
    validate_bucket(bucket)?;
    validate_key(key)
}
