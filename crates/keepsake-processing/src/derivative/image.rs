//! Square JPEG previews for still images.

use std::path::Path;

use ::image::codecs::jpeg::JpegEncoder;
use ::image::imageops::FilterType;
use ::image::ImageReader;
use bytes::Bytes;
use keepsake_core::constants::{DERIVATIVE_EDGE, DERIVATIVE_JPEG_QUALITY};

use super::{Derivative, DerivativeError};

/// Image subtypes the decoder is built with.
const SUPPORTED_SUBTYPES: &[&str] = &[
    "jpeg", "jpg", "pjpeg", "png", "gif", "webp", "bmp", "x-ms-bmp", "tiff",
];

/// Whether `content_type` names an image format that can be previewed.
pub fn is_supported(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.split_once('/') {
        Some(("image", subtype)) => SUPPORTED_SUBTYPES.contains(&subtype),
        _ => false,
    }
}

/// Decode the staged image and crop-to-fill a square JPEG preview.
///
/// Decoding and encoding run on the blocking pool.
pub async fn render_square_preview(
    path: &Path,
    content_type: &str,
) -> Result<Derivative, DerivativeError> {
    if !is_supported(content_type) {
        return Err(DerivativeError::Unsupported(content_type.to_string()));
    }

    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || render_blocking(&path))
        .await
        .map_err(|e| DerivativeError::Failed(format!("Image worker failed: {}", e)))?
}

fn render_blocking(path: &Path) -> Result<Derivative, DerivativeError> {
    let decoded = ImageReader::open(path)
        .map_err(|e| DerivativeError::Failed(format!("Failed to open image: {}", e)))?
        .with_guessed_format()
        .map_err(|e| DerivativeError::Failed(format!("Failed to detect image format: {}", e)))?
        .decode()
        .map_err(|e| DerivativeError::Failed(format!("Failed to decode image: {}", e)))?;

    let preview = decoded
        .resize_to_fill(DERIVATIVE_EDGE, DERIVATIVE_EDGE, FilterType::CatmullRom)
        .to_rgb8();

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, DERIVATIVE_JPEG_QUALITY)
        .encode_image(&preview)
        .map_err(|e| DerivativeError::Failed(format!("Failed to encode preview: {}", e)))?;

    Ok(Derivative {
        bytes: Bytes::from(buffer),
        width: preview.width(),
        height: preview.height(),
    })
}
