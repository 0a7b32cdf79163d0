//! Postgres metadata store: CRUD for the `assets` table.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keepsake_core::{Asset, KeepsakeConfig, Owner};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};

use crate::store::{MetadataError, MetadataResult, MetadataStore};

const ASSET_COLUMNS: &str = "owner_id, id, owner_bucket, owner_email, parent_id, derivative_id, \
                             name, content_type, size, uploaded_at";

/// Connect to `DATABASE_URL` and apply pending migrations.
pub async fn connect(config: &KeepsakeConfig) -> Result<PgPool> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is not set")?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected successfully"
    );

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Row type for the assets table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
struct AssetRow {
    owner_id: String,
    id: String,
    owner_bucket: String,
    owner_email: String,
    parent_id: Option<String>,
    derivative_id: Option<String>,
    name: String,
    content_type: String,
    size: i64,
    uploaded_at: DateTime<Utc>,
}

impl AssetRow {
    fn into_asset(self) -> Asset {
        Asset {
            id: self.id,
            parent_id: self.parent_id,
            derivative_id: self.derivative_id,
            name: self.name,
            content_type: self.content_type,
            size: self.size,
            uploaded_at: self.uploaded_at,
            owner: Owner::new(self.owner_id, self.owner_bucket, self.owner_email),
        }
    }
}

fn backend_error(err: sqlx::Error) -> MetadataError {
    MetadataError::Backend(err.to_string())
}

/// Metadata store backed by the `assets` table.
#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    #[tracing::instrument(skip(self, asset), fields(db.table = "assets", db.record_id = %asset.id))]
    async fn create(&self, asset: &Asset) -> MetadataResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO assets (owner_id, id, owner_bucket, owner_email, parent_id, derivative_id,
                                name, content_type, size, uploaded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&asset.owner.id)
        .bind(&asset.id)
        .bind(&asset.owner.bucket)
        .bind(&asset.owner.email)
        .bind(&asset.parent_id)
        .bind(&asset.derivative_id)
        .bind(&asset.name)
        .bind(&asset.content_type)
        .bind(asset.size)
        .bind(asset.uploaded_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(MetadataError::Conflict(asset.id.clone()))
            }
            Err(e) => Err(backend_error(e)),
        }
    }

    #[tracing::instrument(skip(self, owner), fields(db.table = "assets", db.record_id = %id, owner.id = %owner.id))]
    async fn get(&self, id: &str, owner: &Owner) -> MetadataResult<Asset> {
        let row: Option<AssetRow> = sqlx::query_as::<Postgres, AssetRow>(&format!(
            "SELECT {} FROM assets WHERE owner_id = $1 AND id = $2",
            ASSET_COLUMNS
        ))
        .bind(&owner.id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_error)?;

        row.map(AssetRow::into_asset)
            .ok_or_else(|| MetadataError::NotFound(id.to_string()))
    }

    #[tracing::instrument(skip(self, owner), fields(db.table = "assets", owner.id = %owner.id))]
    async fn get_by_name(&self, name: &str, owner: &Owner) -> MetadataResult<Asset> {
        let row: Option<AssetRow> = sqlx::query_as::<Postgres, AssetRow>(&format!(
            "SELECT {} FROM assets WHERE owner_id = $1 AND name = $2 \
             ORDER BY uploaded_at ASC LIMIT 1",
            ASSET_COLUMNS
        ))
        .bind(&owner.id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_error)?;

        row.map(AssetRow::into_asset)
            .ok_or_else(|| MetadataError::NotFound(name.to_string()))
    }

    #[tracing::instrument(skip(self, owner), fields(db.table = "assets", owner.id = %owner.id))]
    async fn get_all(&self, owner: &Owner) -> MetadataResult<Vec<Asset>> {
        let rows: Vec<AssetRow> = sqlx::query_as::<Postgres, AssetRow>(&format!(
            "SELECT {} FROM assets WHERE owner_id = $1 ORDER BY uploaded_at DESC",
            ASSET_COLUMNS
        ))
        .bind(&owner.id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;

        Ok(rows.into_iter().map(AssetRow::into_asset).collect())
    }

    #[tracing::instrument(skip(self, owner), fields(db.table = "assets", db.record_id = %id, owner.id = %owner.id))]
    async fn delete(&self, id: &str, owner: &Owner) -> MetadataResult<()> {
        sqlx::query("DELETE FROM assets WHERE owner_id = $1 AND id = $2")
            .bind(&owner.id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend_error)?;
        Ok(())
    }
}
