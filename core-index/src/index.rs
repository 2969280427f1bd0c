//! `LocalIndex`: the three index tables behind one handle.

use crate::db::{create_pool, DatabaseConfig};
use crate::error::Result;
use crate::legacy::{migrate_legacy_schema, LEGACY_MIGRATION_COMPLETE};
use crate::models::{AssetFilter, AssetSyncRecord};
use crate::repositories::{
    AssetRepository, BlocklistRepository, KvStore, SqliteAssetRepository,
    SqliteBlocklistRepository, SqliteKvStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, instrument};

/// Well-known `kv_store` keys.
pub mod keys {
    pub const DOWNLOAD_DIRECTORY: &str = "download_directory";
    pub const LAST_SYNC_AT: &str = "last_sync_at";
}

#[derive(Clone)]
pub struct LocalIndex {
    pool: SqlitePool,
    assets: Arc<dyn AssetRepository>,
    kv: Arc<dyn KvStore>,
    blocklist: Arc<dyn BlocklistRepository>,
}

impl LocalIndex {
    /// Open the database, apply migrations and fold any legacy tables.
    ///
    /// A failed legacy fold is logged and does not fail the open.
    pub async fn open(config: DatabaseConfig) -> Result<Self> {
        let pool = create_pool(config).await?;
        migrate_legacy_schema(&pool).await;
        Ok(Self::from_pool(pool))
    }

    pub async fn in_memory() -> Result<Self> {
        Self::open(DatabaseConfig::in_memory()).await
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            assets: Arc::new(SqliteAssetRepository::new(pool.clone())),
            kv: Arc::new(SqliteKvStore::new(pool.clone())),
            blocklist: Arc::new(SqliteBlocklistRepository::new(pool.clone())),
            pool,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn assets(&self) -> &dyn AssetRepository {
        self.assets.as_ref()
    }

    pub fn kv(&self) -> &dyn KvStore {
        self.kv.as_ref()
    }

    pub fn blocklist(&self) -> &dyn BlocklistRepository {
        self.blocklist.as_ref()
    }

    /// Every uploaded record, newest first.
    pub async fn uploaded_records(&self) -> Result<Vec<AssetSyncRecord>> {
        let mut records = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .assets
                .list(AssetFilter::uploaded(true), cursor, 500)
                .await?;
            records.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(records)
    }

    /// User-chosen external directory for downloads, if any.
    pub async fn download_directory(&self) -> Result<Option<String>> {
        Ok(self
            .kv
            .get(keys::DOWNLOAD_DIRECTORY)
            .await?
            .filter(|dir| !dir.trim().is_empty()))
    }

    pub async fn set_download_directory(&self, dir: Option<&str>) -> Result<()> {
        match dir {
            Some(dir) => self.kv.set(keys::DOWNLOAD_DIRECTORY, dir).await,
            None => self.kv.delete(keys::DOWNLOAD_DIRECTORY).await.map(|_| ()),
        }
    }

    /// Drop all assets, blocklist entries and sync state.
    ///
    /// The legacy-migration marker survives so old tables are not folded in
    /// again.
    #[instrument(skip(self))]
    pub async fn wipe(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let assets = sqlx::query("DELETE FROM assets")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let blocked = sqlx::query("DELETE FROM auto_sync_blocklist")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM kv_store WHERE key <> ?")
            .bind(LEGACY_MIGRATION_COMPLETE)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(assets, blocked, "Local index wiped");
        Ok(())
    }
}
