//! SQLite-backed [`StateStore`].
//!
//! One table, `records(key, value, expires_at)`, keyed by the rendered store
//! key. Expiry timestamps are stored as RFC 3339 UTC strings so range
//! comparisons work lexicographically. When the `sqlite-migrations` feature is
//! enabled (default), embedded migrations run on connect; disabling the
//! feature assumes external migration orchestration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use super::{Result, StateStore, StoreError, StoreKey};

fn backend_err(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend {
        message: format!("{context}: {e}"),
    }
}

fn rfc3339(dt: chrono::DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Durable store over a shared SQLite pool.
pub struct SqliteStateStore {
    pool: Arc<SqlitePool>,
}

impl SqliteStateStore {
    /// Connect (or create) a SQLite database at `database_url`.
    /// Example URL: "sqlite://questloom.db?mode=rwc"
    #[must_use = "store must be used to persist state"]
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| backend_err("connect error", e))?;
        // Run embedded migrations only if the feature is enabled (idempotent).
        #[cfg(feature = "sqlite-migrations")]
        {
            if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
                return Err(backend_err("migration failure", e));
            }
        }
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Remove every expired record. Called opportunistically on writes; also
    /// safe to run from a periodic maintenance task.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM records WHERE expires_at <= ?1")
            .bind(rfc3339(Utc::now()))
            .execute(&*self.pool)
            .await
            .map_err(|e| backend_err("purge expired", e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    #[instrument(skip(self, value), err)]
    async fn put(&self, key: &StoreKey, value: String, ttl: Duration) -> Result<()> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO records (key, value, expires_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(key.render())
        .bind(&value)
        .bind(rfc3339(expires_at))
        .execute(&*self.pool)
        .await
        .map_err(|e| backend_err("insert record", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get(&self, key: &StoreKey) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM records WHERE key = ?1 AND expires_at > ?2")
            .bind(key.render())
            .bind(rfc3339(Utc::now()))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| backend_err("select record", e))?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, key: &StoreKey) -> Result<()> {
        sqlx::query("DELETE FROM records WHERE key = ?1")
            .bind(key.render())
            .execute(&*self.pool)
            .await
            .map_err(|e| backend_err("delete record", e))?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateStore").finish()
    }
}
