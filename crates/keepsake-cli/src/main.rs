use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keepsake_cli::{
    init_tracing, owner_from_config, parts_from_paths, App, DeleteFailure, DownloadSummary,
    UploadSummary,
};
use keepsake_core::{ErrorMetadata, KeepsakeConfig};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "keepsake")]
#[command(about = "Ingest, list, fetch and delete media assets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload one or more files as a single batch
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List uploaded originals, newest first
    List,
    /// Look an asset up by file name
    Find { name: String },
    /// Write an asset (or its preview) to a local file
    Download {
        id: String,
        dest: PathBuf,
        #[arg(long)]
        preview: bool,
    },
    /// Delete assets together with their previews
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = KeepsakeConfig::from_env().context("Failed to load configuration")?;
    let _guard = init_tracing(config.log_dir.as_deref())?;

    let owner = owner_from_config(&config)?;
    let app = App::from_config(&config).await?;

    match cli.command {
        Command::Upload { files } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, cancelling batch");
                    on_signal.cancel();
                }
            });

            let parts = parts_from_paths(&files).await?;
            let report = app.ingest.ingest(&owner, parts, &cancel).await?;
            print_json(&UploadSummary::from(&report))?;
            if !report.is_success() {
                std::process::exit(2);
            }
        }
        Command::List => {
            let assets = app.media.list(&owner).await?;
            print_json(&assets)?;
        }
        Command::Find { name } => {
            let asset = app.media.find_by_name(&owner, &name).await?;
            print_json(&asset)?;
        }
        Command::Download { id, dest, preview } => {
            let (asset, mut reader) = if preview {
                app.media.download_derivative(&owner, &id).await?
            } else {
                app.media.download(&owner, &id).await?
            };

            let mut file = tokio::fs::File::create(&dest)
                .await
                .with_context(|| format!("Failed to create {}", dest.display()))?;
            let bytes = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;

            print_json(&DownloadSummary {
                asset: &asset,
                path: &dest,
                bytes,
            })?;
        }
        Command::Delete { ids } => {
            let failures: Vec<DeleteFailure> = app
                .media
                .delete_batch(&owner, ids)
                .await
                .into_iter()
                .map(|(id, reason)| DeleteFailure {
                    id,
                    code: reason.error_code(),
                    reason: reason.to_string(),
                })
                .collect();
            print_json(&failures)?;
            if !failures.is_empty() {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}
