//! Configuration module
//!
//! Environment-driven settings for the Keepsake binaries: staging directory, blob
//! storage backend, metadata database, derivative generation and the timeouts that
//! bound a batch.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage_types::StorageBackend;

const TMP_DIR: &str = "./local/tmp";
const LOCAL_STORAGE_PATH: &str = "./local/blobs";
const DB_MAX_CONNECTIONS: u32 = 5;
const FFMPEG_PATH: &str = "ffmpeg";
const VIDEO_FRAME_TIMEOUT_SECS: u64 = 5;
const UPLOAD_TIMEOUT_SECS: u64 = 180;
const METADATA_TIMEOUT_SECS: u64 = 5;
const BATCH_TIMEOUT_SECS: u64 = 300;

#[derive(Clone, Debug)]
pub struct KeepsakeConfig {
    pub environment: String,
    /// Root directory for staged uploads
    pub tmp_dir: PathBuf,
    // Blob storage
    pub storage_backend: StorageBackend,
    pub local_storage_path: PathBuf,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO, etc.)
    // Metadata store
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    // Derivatives
    pub ffmpeg_path: String,
    pub video_frame_timeout_secs: u64,
    // Batch timeouts
    pub upload_timeout_secs: u64,
    pub metadata_timeout_secs: u64,
    pub batch_timeout_secs: u64,
    // Logging
    pub log_dir: Option<PathBuf>,
    // Identity used by the CLI
    pub owner_id: Option<String>,
    pub owner_email: Option<String>,
}

impl KeepsakeConfig {
    /// Load configuration from the process environment, after reading `.env` if present.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_vars<F>(get: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = get("ENVIRONMENT")
            .or_else(|| get("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let storage_backend = match get("STORAGE_BACKEND") {
            Some(value) => value.parse::<StorageBackend>()?,
            None => StorageBackend::Local,
        };

        let s3_bucket = get("S3_BUCKET");
        let s3_region = get("S3_REGION").or_else(|| get("AWS_REGION"));
        if storage_backend == StorageBackend::S3 {
            if s3_bucket.is_none() {
                return Err(anyhow::anyhow!("S3_BUCKET must be set when STORAGE_BACKEND=s3"));
            }
            if s3_region.is_none() {
                return Err(anyhow::anyhow!(
                    "S3_REGION or AWS_REGION must be set when STORAGE_BACKEND=s3"
                ));
            }
        }

        let config = KeepsakeConfig {
            environment,
            tmp_dir: get("TMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(TMP_DIR)),
            storage_backend,
            local_storage_path: get("LOCAL_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(LOCAL_STORAGE_PATH)),
            s3_bucket,
            s3_region,
            s3_endpoint: get("S3_ENDPOINT"),
            database_url: get("DATABASE_URL"),
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS),
            ffmpeg_path: get("FFMPEG_PATH").unwrap_or_else(|| FFMPEG_PATH.to_string()),
            video_frame_timeout_secs: parse_or(
                &get,
                "VIDEO_FRAME_TIMEOUT_SECS",
                VIDEO_FRAME_TIMEOUT_SECS,
            ),
            upload_timeout_secs: parse_or(&get, "UPLOAD_TIMEOUT_SECS", UPLOAD_TIMEOUT_SECS),
            metadata_timeout_secs: parse_or(&get, "METADATA_TIMEOUT_SECS", METADATA_TIMEOUT_SECS),
            batch_timeout_secs: parse_or(&get, "BATCH_TIMEOUT_SECS", BATCH_TIMEOUT_SECS),
            log_dir: get("LOG_DIR").map(PathBuf::from),
            owner_id: get("OWNER_ID"),
            owner_email: get("OWNER_EMAIL"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        for (name, value) in [
            ("VIDEO_FRAME_TIMEOUT_SECS", self.video_frame_timeout_secs),
            ("UPLOAD_TIMEOUT_SECS", self.upload_timeout_secs),
            ("METADATA_TIMEOUT_SECS", self.metadata_timeout_secs),
            ("BATCH_TIMEOUT_SECS", self.batch_timeout_secs),
        ] {
            if value == 0 {
                return Err(anyhow::anyhow!("{} must be greater than 0", name));
            }
        }

        // Frame extraction must give up well before the batch deadline does.
        if self.video_frame_timeout_secs >= self.batch_timeout_secs {
            return Err(anyhow::anyhow!(
                "VIDEO_FRAME_TIMEOUT_SECS ({}) must be shorter than BATCH_TIMEOUT_SECS ({})",
                self.video_frame_timeout_secs,
                self.batch_timeout_secs
            ));
        }

        if self.db_max_connections == 0 {
            return Err(anyhow::anyhow!("DB_MAX_CONNECTIONS must be greater than 0"));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "production" | "prod")
    }

    pub fn video_frame_timeout(&self) -> Duration {
        Duration::from_secs(self.video_frame_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    get(key)
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}
