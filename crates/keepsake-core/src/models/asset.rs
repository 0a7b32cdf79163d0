//! Asset model: a user-owned unit of content, either an original or its derivative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::owner::Owner;
use crate::constants::{DERIVATIVE_CONTENT_TYPE, DERIVATIVE_PREFIX};

/// Id of the derivative belonging to `parent_id`.
pub fn derivative_id_for(parent_id: &str) -> String {
    format!("{}{}", DERIVATIVE_PREFIX, parent_id)
}

/// Ids carrying the derivative prefix belong to previews and cannot name an original.
pub fn is_reserved_id(id: &str) -> bool {
    id.starts_with(DERIVATIVE_PREFIX)
}

/// Display name of the derivative belonging to an asset called `parent_name`.
pub fn derivative_name_for(parent_name: &str) -> String {
    format!("{}{}", DERIVATIVE_PREFIX, parent_name)
}

/// Broad media family, derived from the MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    pub fn from_content_type(content_type: &str) -> Self {
        let top_level = content_type
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match top_level.as_str() {
            "image" => MediaKind::Image,
            "video" => MediaKind::Video,
            _ => MediaKind::Other,
        }
    }
}

/// Metadata record of a stored asset.
///
/// `parent_id` is set only on derivatives; `derivative_id` is set on an original only
/// once its derivative is committed to both the blob and the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivative_id: Option<String>,
    pub name: String,
    pub content_type: String,
    pub size: i64,
    pub uploaded_at: DateTime<Utc>,
    pub owner: Owner,
}

impl Asset {
    /// New original asset, not yet linked to any derivative.
    pub fn original(
        id: impl Into<String>,
        name: impl Into<String>,
        content_type: impl Into<String>,
        size: i64,
        owner: Owner,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            derivative_id: None,
            name: name.into(),
            content_type: content_type.into(),
            size,
            uploaded_at: Utc::now(),
            owner,
        }
    }

    /// Derivative record for `parent`, with the deterministic `thumb-` id and name.
    pub fn derivative_of(parent: &Asset, size: i64) -> Self {
        Self {
            id: derivative_id_for(&parent.id),
            parent_id: Some(parent.id.clone()),
            derivative_id: None,
            name: derivative_name_for(&parent.name),
            content_type: DERIVATIVE_CONTENT_TYPE.to_string(),
            size,
            uploaded_at: Utc::now(),
            owner: parent.owner.clone(),
        }
    }

    pub fn is_derivative(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::from_content_type(&self.content_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Owner {
        Owner::new("owner-1", "owner-bucket", "owner@example.com")
    }

    #[test]
    fn derivative_record_links_back_to_parent() {
        let parent = Asset::original("abc", "cat.png", "image/png", 2048, owner());
        let derivative = Asset::derivative_of(&parent, 512);

        assert_eq!(derivative.id, "thumb-abc");
        assert_eq!(derivative.name, "thumb-cat.png");
        assert_eq!(derivative.parent_id.as_deref(), Some("abc"));
        assert_eq!(derivative.content_type, "image/jpeg");
        assert_eq!(derivative.owner, parent.owner);
        assert!(derivative.is_derivative());
        assert!(!parent.is_derivative());
    }

    #[test]
    fn preview_ids_are_reserved() {
        assert!(is_reserved_id(&derivative_id_for("a1")));
        assert!(is_reserved_id("thumb-x"));
        assert!(!is_reserved_id("x-thumb"));
        assert!(!is_reserved_id("a1"));
    }

    #[test]
    fn media_kind_from_content_type() {
        assert_eq!(MediaKind::from_content_type("image/png"), MediaKind::Image);
        assert_eq!(MediaKind::from_content_type("Video/MP4"), MediaKind::Video);
        assert_eq!(
            MediaKind::from_content_type("application/pdf"),
            MediaKind::Other
        );
        assert_eq!(MediaKind::from_content_type(""), MediaKind::Other);
    }

    #[test]
    fn unset_links_are_omitted_from_json() {
        let asset = Asset::original("abc", "cat.png", "image/png", 1, owner());
        let json = serde_json::to_value(&asset).unwrap();
        assert!(json.get("parent_id").is_none());
        assert!(json.get("derivative_id").is_none());
    }
}
