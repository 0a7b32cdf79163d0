//! Preview derivatives for image and video assets.
//!
//! Images become a 150×150 crop-to-fill JPEG; videos yield one JPEG frame 150 pixels wide
//! with the aspect ratio preserved. Anything else has no derivative.

#[cfg(feature = "image")]
pub mod image;
#[cfg(feature = "video")]
pub mod video;

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use keepsake_core::{Asset, KeepsakeConfig, MediaKind};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DerivativeError {
    /// The content type has no preview support; the derivative step is skipped.
    #[error("No preview support for {0}")]
    Unsupported(String),

    #[error("Preview generation failed: {0}")]
    Failed(String),

    #[error("Preview generation cancelled")]
    Cancelled,
}

/// Encoded JPEG preview.
#[derive(Debug, Clone)]
pub struct Derivative {
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
}

impl Derivative {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Streaming reader over the encoded bytes.
    pub fn reader(&self) -> Cursor<Bytes> {
        Cursor::new(self.bytes.clone())
    }
}

#[async_trait]
pub trait DerivativeGenerator: Send + Sync {
    /// Produce a preview of the staged file, or `None` when the asset is neither image
    /// nor video.
    async fn generate(
        &self,
        cancel: &CancellationToken,
        asset: &Asset,
        staged_path: &Path,
    ) -> Result<Option<Derivative>, DerivativeError>;
}

#[derive(Debug, Clone)]
pub struct DerivativeSettings {
    pub ffmpeg_path: String,
    pub frame_timeout: Duration,
}

impl DerivativeSettings {
    pub fn from_config(config: &KeepsakeConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            frame_timeout: config.video_frame_timeout(),
        }
    }
}

impl Default for DerivativeSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            frame_timeout: Duration::from_secs(5),
        }
    }
}

/// Default generator: in-process image resampling and FFmpeg frame extraction.
#[derive(Debug, Clone)]
pub struct PreviewGenerator {
    settings: DerivativeSettings,
}

impl PreviewGenerator {
    pub fn new(settings: DerivativeSettings) -> Result<Self> {
        let dangerous_chars = [';', '|', '&', '$', '`', '(', ')', '<', '>', '\n', '\r'];
        if settings
            .ffmpeg_path
            .chars()
            .any(|c| dangerous_chars.contains(&c))
        {
            return Err(anyhow!("Invalid ffmpeg_path: contains dangerous characters"));
        }

        Ok(Self { settings })
    }

    pub fn settings(&self) -> &DerivativeSettings {
        &self.settings
    }
}

#[async_trait]
impl DerivativeGenerator for PreviewGenerator {
    #[tracing::instrument(skip(self, cancel, asset, staged_path), fields(asset.id = %asset.id, content_type = %asset.content_type))]
    async fn generate(
        &self,
        cancel: &CancellationToken,
        asset: &Asset,
        staged_path: &Path,
    ) -> Result<Option<Derivative>, DerivativeError> {
        let start = std::time::Instant::now();

        let work = async {
            match asset.kind() {
                #[cfg(feature = "image")]
                MediaKind::Image => {
                    image::render_square_preview(staged_path, &asset.content_type).await
                }
                #[cfg(feature = "video")]
                MediaKind::Video => {
                    video::extract_frame(
                        &self.settings.ffmpeg_path,
                        staged_path,
                        self.settings.frame_timeout,
                    )
                    .await
                }
                #[allow(unreachable_patterns)]
                MediaKind::Image | MediaKind::Video => {
                    Err(DerivativeError::Unsupported(asset.content_type.clone()))
                }
                MediaKind::Other => return Ok(None),
            }
            .map(Some)
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(DerivativeError::Cancelled),
            result = work => result,
        };

        if let Ok(Some(derivative)) = &result {
            tracing::debug!(
                width = derivative.width,
                height = derivative.height,
                size_bytes = derivative.len(),
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Preview generated"
            );
        }

        result
    }
}
