//! Wiring shared by the `keepsake` binary: logging, store construction and the
//! JSON shapes printed on stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use keepsake_core::{Asset, KeepsakeConfig, Owner};
use keepsake_db::{MemoryMetadataStore, MetadataStore, PgMetadataStore};
use keepsake_processing::{DerivativeSettings, PreviewGenerator, Stager};
use keepsake_services::{
    BatchReport, BatchStatus, InboundPart, IngestService, IngestSettings, MediaService,
    ReportEntry,
};
use keepsake_storage::create_blob_store;
use serde::Serialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber: stderr always, plus a daily-rolling file under
/// `log_dir` when given.
///
/// The returned guard flushes the file writer when dropped; keep it alive until exit.
pub fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keepsake=info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "keepsake.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// MIME type guessed from the file extension.
pub fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// The identity the CLI acts as: `OWNER_EMAIL`, with `OWNER_ID` defaulting to it.
pub fn owner_from_config(config: &KeepsakeConfig) -> Result<Owner> {
    let email = config
        .owner_email
        .clone()
        .context("OWNER_EMAIL must be set")?;
    let id = config.owner_id.clone().unwrap_or_else(|| email.clone());

    let owner = Owner::from_email(id, email);
    if !owner.is_valid() {
        anyhow::bail!("OWNER_EMAIL does not yield a usable bucket name");
    }
    Ok(owner)
}

/// Postgres when `DATABASE_URL` is set, otherwise an in-process store.
pub async fn create_metadata_store(config: &KeepsakeConfig) -> Result<Arc<dyn MetadataStore>> {
    if config.database_url.is_some() {
        let pool = keepsake_db::connect(config).await?;
        return Ok(Arc::new(PgMetadataStore::new(pool)));
    }

    tracing::warn!("DATABASE_URL not set; metadata is kept in memory for this run only");
    Ok(Arc::new(MemoryMetadataStore::new()))
}

pub struct App {
    pub ingest: IngestService,
    pub media: MediaService,
}

impl App {
    pub async fn from_config(config: &KeepsakeConfig) -> Result<Self> {
        let metadata = create_metadata_store(config).await?;
        Self::with_metadata(config, metadata).await
    }

    pub async fn with_metadata(
        config: &KeepsakeConfig,
        metadata: Arc<dyn MetadataStore>,
    ) -> Result<Self> {
        let blobs = create_blob_store(config)
            .await
            .context("Failed to create blob store")?;
        let generator = PreviewGenerator::new(DerivativeSettings::from_config(config))?;

        let ingest = IngestService::new(
            metadata.clone(),
            blobs.clone(),
            Arc::new(generator),
            Stager::new(config.tmp_dir.clone()),
            IngestSettings::from_config(config),
        );
        let media = MediaService::new(
            metadata,
            blobs,
            config.metadata_timeout(),
            config.upload_timeout(),
        );

        tracing::info!(
            storage_backend = %config.storage_backend,
            tmp_dir = %config.tmp_dir.display(),
            "Keepsake services ready"
        );

        Ok(Self { ingest, media })
    }
}

/// Open local files as upload parts.
pub async fn parts_from_paths(paths: &[PathBuf]) -> Result<Vec<InboundPart>> {
    let mut parts = Vec::with_capacity(paths.len());
    for path in paths {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("{} has no file name", path.display()))?;
        parts.push(InboundPart::new(name, content_type_for(path), Box::pin(file)));
    }
    Ok(parts)
}

#[derive(Debug, Serialize)]
pub struct UploadSummary {
    pub status: BatchStatus,
    pub committed: Vec<String>,
    pub entries: Vec<ReportEntry>,
}

impl From<&BatchReport> for UploadSummary {
    fn from(report: &BatchReport) -> Self {
        Self {
            status: report.status(),
            committed: report.committed.clone(),
            entries: report.entries(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteFailure {
    pub id: String,
    pub code: &'static str,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct DownloadSummary<'a> {
    pub asset: &'a Asset,
    pub path: &'a Path,
    pub bytes: u64,
}
