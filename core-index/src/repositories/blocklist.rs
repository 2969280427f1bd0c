//! Auto-sync blocklist
//!
//! Fingerprints the user deleted from the remote. Automatic sync skips them so
//! a re-scan of the device does not upload the same photo again.

use crate::error::Result;
use crate::models::BlocklistEntry;
use crate::repositories::now_millis;
use async_trait::async_trait;
use sqlx::{query_as, SqlitePool};

#[async_trait]
pub trait BlocklistRepository: Send + Sync {
    /// Block `fingerprint`; re-blocking refreshes `blocked_at` and `reason`.
    async fn add(&self, fingerprint: &str, asset_id: Option<&str>, reason: Option<&str>)
        -> Result<()>;

    async fn remove(&self, fingerprint: &str) -> Result<bool>;

    async fn contains(&self, fingerprint: &str) -> Result<bool>;

    /// Newest first.
    async fn list(&self) -> Result<Vec<BlocklistEntry>>;

    async fn clear(&self) -> Result<u64>;
}

pub struct SqliteBlocklistRepository {
    pool: SqlitePool,
}

impl SqliteBlocklistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlocklistRepository for SqliteBlocklistRepository {
    async fn add(
        &self,
        fingerprint: &str,
        asset_id: Option<&str>,
        reason: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO auto_sync_blocklist (fingerprint, asset_id, blocked_at, reason)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                asset_id = COALESCE(excluded.asset_id, asset_id),
                blocked_at = excluded.blocked_at,
                reason = excluded.reason
            "#,
        )
        .bind(fingerprint)
        .bind(asset_id)
        .bind(now_millis())
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM auto_sync_blocklist WHERE fingerprint = ?")
            .bind(fingerprint)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn contains(&self, fingerprint: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM auto_sync_blocklist WHERE fingerprint = ?")
                .bind(fingerprint)
                .fetch_optional(&self.pool)
                .await?;

        Ok(found.is_some())
    }

    async fn list(&self) -> Result<Vec<BlocklistEntry>> {
        let entries = query_as::<_, BlocklistEntry>(
            "SELECT * FROM auto_sync_blocklist ORDER BY blocked_at DESC, fingerprint ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM auto_sync_blocklist")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
