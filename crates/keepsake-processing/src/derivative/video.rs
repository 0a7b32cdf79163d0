//! Single-frame previews for video, extracted with FFmpeg.

use std::io::Cursor;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use ::image::ImageReader;
use bytes::Bytes;
use keepsake_core::constants::DERIVATIVE_EDGE;
use tokio::process::Command;

use super::{Derivative, DerivativeError};

/// Extract the first frame as a JPEG, `DERIVATIVE_EDGE` wide with the aspect ratio kept.
///
/// The child process is killed if it outlives `timeout`.
pub async fn extract_frame(
    ffmpeg_path: &str,
    input: &Path,
    timeout: Duration,
) -> Result<Derivative, DerivativeError> {
    let start = std::time::Instant::now();
    let scale_filter = format!("scale={}:-2", DERIVATIVE_EDGE);

    let child = Command::new(ffmpeg_path)
        .arg("-v")
        .arg("error")
        .arg("-i")
        .arg(input)
        .args(["-frames:v", "1"])
        .args(["-vf", &scale_filter])
        .args(["-f", "image2", "-c:v", "mjpeg", "pipe:1"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DerivativeError::Failed(format!("Failed to execute ffmpeg: {}", e)))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(DerivativeError::Failed(format!(
                "Failed to read ffmpeg output: {}",
                e
            )))
        }
        Err(_) => {
            tracing::warn!(
                input = %input.display(),
                timeout_secs = timeout.as_secs_f64(),
                "Frame extraction timed out"
            );
            return Err(DerivativeError::Failed(format!(
                "Frame extraction timed out after {:?}",
                timeout
            )));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DerivativeError::Failed(format!(
            "FFmpeg frame extraction failed: {}",
            stderr.trim()
        )));
    }

    let bytes = Bytes::from(output.stdout);
    let (width, height) = ImageReader::new(Cursor::new(&bytes[..]))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok())
        .ok_or_else(|| DerivativeError::Failed("FFmpeg produced no readable frame".to_string()))?;

    tracing::debug!(
        input = %input.display(),
        width,
        height,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Frame extracted"
    );

    Ok(Derivative {
        bytes,
        width,
        height,
    })
}
