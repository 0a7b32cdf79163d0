//! Buffering inbound byte streams to private files under a staging root.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Invalid staging id: {0}")]
    InvalidId(String),

    #[error("Failed to create staging file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write staging file: {0}")]
    Write(#[source] io::Error),

    #[error("Staging cancelled")]
    Cancelled,
}

/// A fully written staging file. The file is removed when this value is dropped.
#[derive(Debug)]
pub struct StagedFile {
    path: TempPath,
    bytes_written: u64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Open the staged bytes for reading.
    pub async fn open(&self) -> io::Result<fs::File> {
        fs::File::open(&self.path).await
    }
}

/// Copies readers to `{root}/{id}`.
#[derive(Debug, Clone)]
pub struct Stager {
    root: PathBuf,
}

impl Stager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stage `reader` under `id`, racing the copy against `cancel`.
    ///
    /// On cancellation or a write error the partial file is removed before returning.
    #[tracing::instrument(skip(self, cancel, reader), fields(staging.root = %self.root.display()))]
    pub async fn stage<R>(
        &self,
        cancel: &CancellationToken,
        id: &str,
        mut reader: R,
    ) -> Result<StagedFile, StageError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        if !is_path_component(id) {
            return Err(StageError::InvalidId(id.to_string()));
        }

        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StageError::Create {
                path: self.root.clone(),
                source,
            })?;

        let path = self.root.join(id);
        let mut file = fs::File::create(&path)
            .await
            .map_err(|source| StageError::Create {
                path: path.clone(),
                source,
            })?;
        // From here on the file is removed on every early return.
        let temp_path = match TempPath::try_from_path(path.clone()) {
            Ok(temp_path) => temp_path,
            Err(source) => {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(StageError::Create { path, source });
            }
        };

        let mut copy = tokio::spawn(async move {
            let written = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            Ok::<u64, io::Error>(written)
        });

        tokio::select! {
            _ = cancel.cancelled() => {
                copy.abort();
                let _ = copy.await;
                drop(temp_path);
                tracing::debug!(id = %id, "Staging cancelled, partial file removed");
                Err(StageError::Cancelled)
            }
            joined = &mut copy => match joined {
                Ok(Ok(bytes_written)) => {
                    tracing::debug!(id = %id, size_bytes = bytes_written, "Staged upload");
                    Ok(StagedFile { path: temp_path, bytes_written })
                }
                Ok(Err(e)) => Err(StageError::Write(e)),
                Err(join_err) => Err(StageError::Write(io::Error::other(join_err.to_string()))),
            }
        }
    }
}

/// A single, non-hidden path component with no separators.
fn is_path_component(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 255
        && !id.starts_with('.')
        && !id.contains(['/', '\\', '\0'])
}
