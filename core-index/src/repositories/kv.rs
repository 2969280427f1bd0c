//! Key/value table for scalar sync state

use crate::error::Result;
use crate::repositories::now_millis;
use async_trait::async_trait;
use sqlx::SqlitePool;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// # Returns
    /// `Ok(true)` if the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key except those listed.
    async fn clear_except(&self, keep: &[&str]) -> Result<u64>;
}

pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_except(&self, keep: &[&str]) -> Result<u64> {
        let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new("DELETE FROM kv_store");
        if !keep.is_empty() {
            builder.push(" WHERE key NOT IN (");
            let mut separated = builder.separated(", ");
            for key in keep {
                separated.push_bind(*key);
            }
            separated.push_unseparated(")");
        }

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
