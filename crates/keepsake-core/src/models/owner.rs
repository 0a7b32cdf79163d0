//! Owner model: the authenticated identity that owns assets.

use serde::{Deserialize, Serialize};

/// Authenticated identity with its assigned storage bucket.
///
/// Resolved by the authentication layer; the ingestion core treats it as already
/// validated and never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub bucket: String,
    pub email: String,
}

impl Owner {
    pub fn new(id: impl Into<String>, bucket: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bucket: bucket.into(),
            email: email.into(),
        }
    }

    /// Build an owner whose bucket is derived from the local part of the email.
    ///
    /// The bucket name is lowercased and every character outside `[a-z0-9-]` is
    /// replaced by `-`, so `Jane.Doe@example.com` maps to `jane-doe`.
    pub fn from_email(id: impl Into<String>, email: impl Into<String>) -> Self {
        let email = email.into();
        let local = email.split('@').next().unwrap_or_default();
        let bucket: String = local
            .chars()
            .map(|c| {
                let c = c.to_ascii_lowercase();
                if c.is_ascii_alphanumeric() || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect();

        Self {
            id: id.into(),
            bucket,
            email,
        }
    }

    /// An owner can only be used for storage when both identity and bucket are set.
    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty() && !self.bucket.trim().is_empty()
    }
}
