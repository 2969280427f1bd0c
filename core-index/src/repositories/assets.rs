//! Asset sync record repository

use crate::error::{IndexError, Result};
use crate::models::{AssetCursor, AssetFilter, AssetPage, AssetPatch, AssetSyncRecord};
use async_trait::async_trait;
use sqlx::{query_as, QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, instrument};

#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Point lookup by fingerprint.
    async fn get(&self, fingerprint: &str) -> Result<Option<AssetSyncRecord>>;

    /// Most recently seen record for a device asset id.
    async fn find_by_asset_id(&self, asset_id: &str) -> Result<Option<AssetSyncRecord>>;

    /// Keyset-paginated listing, newest `last_seen_at` first.
    ///
    /// # Errors
    /// Returns `InvalidInput` when `limit` is zero.
    async fn list(
        &self,
        filter: AssetFilter,
        after: Option<AssetCursor>,
        limit: u32,
    ) -> Result<AssetPage>;

    /// Insert or fully replace a record.
    async fn upsert(&self, record: &AssetSyncRecord) -> Result<()>;

    /// Merge the set fields of `patch` into an existing record.
    ///
    /// # Returns
    /// `Ok(false)` if no record exists for `fingerprint`.
    async fn touch(&self, fingerprint: &str, patch: &AssetPatch) -> Result<bool>;

    /// # Returns
    /// `Ok(true)` if a record was deleted.
    async fn delete(&self, fingerprint: &str) -> Result<bool>;

    /// Remove every record last seen before `cutoff`. Returns the row count.
    async fn delete_not_seen_since(&self, cutoff: i64) -> Result<u64>;

    async fn count(&self, filter: AssetFilter) -> Result<i64>;

    async fn delete_all(&self) -> Result<u64>;
}

pub struct SqliteAssetRepository {
    pool: SqlitePool,
}

impl SqliteAssetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: AssetFilter) {
    if let Some(uploaded) = filter.uploaded {
        builder.push(" AND uploaded = ").push_bind(uploaded);
    }
}

#[async_trait]
impl AssetRepository for SqliteAssetRepository {
    async fn get(&self, fingerprint: &str) -> Result<Option<AssetSyncRecord>> {
        let record = query_as::<_, AssetSyncRecord>("SELECT * FROM assets WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn find_by_asset_id(&self, asset_id: &str) -> Result<Option<AssetSyncRecord>> {
        let record = query_as::<_, AssetSyncRecord>(
            "SELECT * FROM assets WHERE asset_id = ? ORDER BY last_seen_at DESC LIMIT 1",
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[instrument(skip(self, after))]
    async fn list(
        &self,
        filter: AssetFilter,
        after: Option<AssetCursor>,
        limit: u32,
    ) -> Result<AssetPage> {
        if limit == 0 {
            return Err(IndexError::invalid("limit", "must be greater than zero"));
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM assets WHERE 1 = 1");
        push_filter(&mut builder, filter);
        if let Some(cursor) = after {
            builder
                .push(" AND (last_seen_at < ")
                .push_bind(cursor.last_seen_at)
                .push(" OR (last_seen_at = ")
                .push_bind(cursor.last_seen_at)
                .push(" AND fingerprint < ")
                .push_bind(cursor.fingerprint)
                .push("))");
        }
        // One extra row tells us whether another page exists.
        builder
            .push(" ORDER BY last_seen_at DESC, fingerprint DESC LIMIT ")
            .push_bind(i64::from(limit) + 1);

        let mut items = builder
            .build_query_as::<AssetSyncRecord>()
            .fetch_all(&self.pool)
            .await?;

        let next_cursor = if items.len() > limit as usize {
            items.truncate(limit as usize);
            items.last().map(AssetSyncRecord::cursor)
        } else {
            None
        };

        Ok(AssetPage { items, next_cursor })
    }

    async fn upsert(&self, record: &AssetSyncRecord) -> Result<()> {
        record
            .validate()
            .map_err(|message| IndexError::invalid("record", message))?;

        sqlx::query(
            r#"
            INSERT INTO assets (
                fingerprint, asset_id, repo_path, uploaded, file_size, created_at,
                content_hash, preview_hash, last_seen_at, last_uploaded_at, last_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                asset_id = excluded.asset_id,
                repo_path = excluded.repo_path,
                uploaded = excluded.uploaded,
                file_size = excluded.file_size,
                created_at = excluded.created_at,
                content_hash = excluded.content_hash,
                preview_hash = excluded.preview_hash,
                last_seen_at = excluded.last_seen_at,
                last_uploaded_at = excluded.last_uploaded_at,
                last_error = excluded.last_error
            "#,
        )
        .bind(&record.fingerprint)
        .bind(&record.asset_id)
        .bind(&record.repo_path)
        .bind(record.uploaded)
        .bind(record.file_size)
        .bind(record.created_at)
        .bind(&record.content_hash)
        .bind(&record.preview_hash)
        .bind(record.last_seen_at)
        .bind(record.last_uploaded_at)
        .bind(&record.last_error)
        .execute(&self.pool)
        .await?;

        debug!(fingerprint = %record.fingerprint, uploaded = record.uploaded, "Upserted asset record");
        Ok(())
    }

    async fn touch(&self, fingerprint: &str, patch: &AssetPatch) -> Result<bool> {
        if matches!(&patch.repo_path, Some(path) if path.trim().is_empty()) {
            return Err(IndexError::invalid("repo_path", "must not be empty"));
        }

        let (set_error, error_value) = match &patch.last_error {
            Some(value) => (true, value.clone()),
            None => (false, None),
        };

        let result = sqlx::query(
            r#"
            UPDATE assets SET
                asset_id = COALESCE(?, asset_id),
                repo_path = COALESCE(?, repo_path),
                uploaded = COALESCE(?, uploaded),
                file_size = COALESCE(?, file_size),
                created_at = COALESCE(?, created_at),
                content_hash = COALESCE(?, content_hash),
                preview_hash = COALESCE(?, preview_hash),
                last_seen_at = COALESCE(?, last_seen_at),
                last_uploaded_at = COALESCE(?, last_uploaded_at),
                last_error = CASE WHEN ? THEN ? ELSE last_error END
            WHERE fingerprint = ?
            "#,
        )
        .bind(&patch.asset_id)
        .bind(&patch.repo_path)
        .bind(patch.uploaded)
        .bind(patch.file_size)
        .bind(patch.created_at)
        .bind(&patch.content_hash)
        .bind(&patch.preview_hash)
        .bind(patch.last_seen_at)
        .bind(patch.last_uploaded_at)
        .bind(set_error)
        .bind(error_value)
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, fingerprint: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM assets WHERE fingerprint = ?")
            .bind(fingerprint)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete_not_seen_since(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM assets WHERE last_seen_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        debug!(removed = result.rows_affected(), "Swept stale asset records");
        Ok(result.rows_affected())
    }

    async fn count(&self, filter: AssetFilter) -> Result<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM assets WHERE 1 = 1");
        push_filter(&mut builder, filter);

        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM assets")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
