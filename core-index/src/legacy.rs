//! One-time fold of the previous index schema into `assets`.
//!
//! Older installs kept upload state in `upload_index` and a copy of remote
//! metadata in `meta_cache`:
//!
//! ```text
//! upload_index(fingerprint, asset_id, repo_path, uploaded, file_size, created_at,
//!              content_hash, last_seen_at, last_uploaded_at, last_error)
//! meta_cache(fingerprint, repo_path, preview_hash, created_at, file_size,
//!            content_hash, uploaded_at)
//! ```
//!
//! Upload rows win; meta rows only fill gaps. The whole fold runs in one
//! transaction. Failure leaves the old tables in place and the next open
//! tries again.

use crate::error::Result;
use crate::repositories::now_millis;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, warn};

pub const LEGACY_MIGRATION_COMPLETE: &str = "legacy_migration_complete";

const UPLOAD_TABLE: &str = "upload_index";
const META_TABLE: &str = "meta_cache";

/// Run the legacy fold if it has not completed yet.
///
/// Never fails: errors are logged and reported as `false`.
pub async fn migrate_legacy_schema(pool: &SqlitePool) -> bool {
    match try_migrate(pool).await {
        Ok(migrated) => migrated,
        Err(e) => {
            warn!(error = %e, "Legacy index migration failed; will retry on next open");
            false
        }
    }
}

async fn try_migrate(pool: &SqlitePool) -> Result<bool> {
    let done: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
        .bind(LEGACY_MIGRATION_COMPLETE)
        .fetch_optional(pool)
        .await?;
    if done.is_some() {
        return Ok(false);
    }

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN (?, ?)",
    )
    .bind(UPLOAD_TABLE)
    .bind(META_TABLE)
    .fetch_all(pool)
    .await?;

    let has_uploads = tables.iter().any(|t| t == UPLOAD_TABLE);
    let has_meta = tables.iter().any(|t| t == META_TABLE);

    let mut tx = pool.begin().await?;
    let now = now_millis();

    let mut folded = 0;
    if has_uploads {
        folded += fold_upload_rows(&mut tx, now).await?;
    }
    if has_meta {
        folded += fold_meta_rows(&mut tx, now).await?;
    }

    sqlx::query(
        r#"
        INSERT INTO kv_store (key, value, updated_at) VALUES (?, '1', ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(LEGACY_MIGRATION_COMPLETE)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DROP TABLE IF EXISTS upload_index")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DROP TABLE IF EXISTS meta_cache")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    if has_uploads || has_meta {
        info!(rows = folded, "Folded legacy index tables into assets");
    } else {
        debug!("No legacy index tables found");
    }
    Ok(has_uploads || has_meta)
}

async fn fold_upload_rows(tx: &mut Transaction<'_, Sqlite>, now: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO assets (
            fingerprint, asset_id, repo_path, uploaded, file_size, created_at,
            content_hash, last_seen_at, last_uploaded_at, last_error
        )
        SELECT
            fingerprint, asset_id, repo_path, COALESCE(uploaded, 0), file_size, created_at,
            content_hash, COALESCE(last_seen_at, last_uploaded_at, ?), last_uploaded_at, last_error
        FROM upload_index
        WHERE fingerprint IS NOT NULL AND repo_path IS NOT NULL AND repo_path <> ''
        ON CONFLICT(fingerprint) DO NOTHING
        "#,
    )
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

async fn fold_meta_rows(tx: &mut Transaction<'_, Sqlite>, now: i64) -> Result<u64> {
    // Meta rows describe files already on the remote.
    let result = sqlx::query(
        r#"
        INSERT INTO assets (
            fingerprint, repo_path, uploaded, file_size, created_at,
            content_hash, preview_hash, last_seen_at, last_uploaded_at
        )
        SELECT
            fingerprint, repo_path, 1, file_size, created_at,
            content_hash, preview_hash, COALESCE(uploaded_at, ?), uploaded_at
        FROM meta_cache
        WHERE fingerprint IS NOT NULL AND repo_path IS NOT NULL AND repo_path <> ''
        ON CONFLICT(fingerprint) DO UPDATE SET
            file_size = COALESCE(assets.file_size, excluded.file_size),
            created_at = COALESCE(assets.created_at, excluded.created_at),
            content_hash = COALESCE(assets.content_hash, excluded.content_hash),
            preview_hash = COALESCE(assets.preview_hash, excluded.preview_hash),
            last_uploaded_at = COALESCE(assets.last_uploaded_at, excluded.last_uploaded_at)
        "#,
    )
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    #[tokio::test]
    async fn test_fresh_database_marks_complete() {
        let pool = create_test_pool().await.unwrap();

        assert!(!migrate_legacy_schema(&pool).await);

        let flag: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
            .bind(LEGACY_MIGRATION_COMPLETE)
            .fetch_optional(&pool)
            .await
            .unwrap();
        assert_eq!(flag.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_broken_legacy_table_rolls_back() {
        let pool = create_test_pool().await.unwrap();
        sqlx::query("CREATE TABLE upload_index (fingerprint TEXT PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO upload_index (fingerprint) VALUES ('a.jpg_1_2')")
            .execute(&pool)
            .await
            .unwrap();

        assert!(!migrate_legacy_schema(&pool).await);

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_index")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 1);

        let flag: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
            .bind(LEGACY_MIGRATION_COMPLETE)
            .fetch_optional(&pool)
            .await
            .unwrap();
        assert!(flag.is_none());
    }
}
