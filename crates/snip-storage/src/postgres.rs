use crate::batch::BatchConflicts;
use crate::config::PostgresConfig;
use crate::sql::{
    count_to_u64, is_unique_violation, lookup_result, map_sqlx_error, now_unix_seconds,
    user_records, UrlRow, URL_COLUMNS,
};
use async_trait::async_trait;
use snip_core::{ReadStorage, Result, Record, Stats, Storage, StorageError, UserId};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Creates the `urls` table and its indexes, optionally wiping existing rows.
pub async fn init_schema(pool: &PgPool, clear_on_start: bool) -> Result<()> {
    sqlx::raw_sql(include_str!("../ddl/postgres/urls.sql"))
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;

    if clear_on_start {
        info!("clearing postgres storage on start");
        sqlx::query("TRUNCATE urls")
            .execute(pool)
            .await
            .map_err(map_sqlx_error)?;
    }

    Ok(())
}

/// Pooled PostgreSQL implementation of the storage contract.
///
/// Soft delete is implemented with `is_deleted`. A URL owns at most one row:
/// re-adding a deleted URL flips the existing row back to live for the new
/// owner, and the unique index on `url` rejects duplicates of live rows.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Creates a storage from an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool for `config.dsn`.
    ///
    /// The schema is not touched; call [`init_schema`] once afterwards.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.dsn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Restores a tombstoned row for `url` or inserts a fresh one.
async fn restore_or_insert(
    conn: &mut PgConnection,
    url: &str,
    url_id: &str,
    user_id: UserId,
) -> Result<()> {
    let now = now_unix_seconds();

    let restored = sqlx::query(
        r#"
        UPDATE urls
        SET is_deleted = FALSE, user_id = $1, url_id = $2, added = $3
        WHERE url = $4
          AND is_deleted
        "#,
    )
    .bind(i64::from(user_id))
    .bind(url_id)
    .bind(now)
    .bind(url)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    if restored.rows_affected() > 0 {
        debug!(url_id, user_id, "restored deleted url");
        return Ok(());
    }

    let result = sqlx::query(
        r#"
        INSERT INTO urls (url, url_id, user_id, added, is_deleted)
        VALUES ($1, $2, $3, $4, FALSE)
        "#,
    )
    .bind(url)
    .bind(url_id)
    .bind(i64::from(user_id))
    .bind(now)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => {
            Err(StorageError::unique_violation(url, url_id, user_id))
        }
        Err(err) => Err(map_sqlx_error(err)),
    }
}

#[async_trait]
impl ReadStorage for PostgresStorage {
    async fn get_url_by_id(&self, url_id: &str) -> Result<Record> {
        let row = sqlx::query_as::<_, UrlRow>(&format!(
            "SELECT {URL_COLUMNS} FROM urls WHERE url_id = $1 ORDER BY is_deleted ASC LIMIT 1"
        ))
        .bind(url_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        lookup_result(url_id, row)
    }

    async fn get_urls_by_user(&self, user_id: UserId) -> Result<Vec<Record>> {
        let rows = sqlx::query_as::<_, UrlRow>(&format!(
            "SELECT {URL_COLUMNS} FROM urls WHERE user_id = $1 AND NOT is_deleted"
        ))
        .bind(i64::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        user_records(user_id, rows)
    }

    async fn ping(&self) -> bool {
        if self.pool.is_closed() {
            return false;
        }

        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "postgres ping failed");
                false
            }
        }
    }

    async fn stats(&self) -> Result<Stats> {
        let (urls, users) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COUNT(DISTINCT user_id) FROM urls WHERE NOT is_deleted",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(Stats {
            urls: count_to_u64(urls),
            users: count_to_u64(users),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn add_url(&self, url: &str, url_id: &str, user_id: UserId) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        restore_or_insert(&mut conn, url, url_id, user_id).await
    }

    async fn add_url_batch(&self, urls: &HashMap<String, String>, user_id: UserId) -> Result<()> {
        // One connection keeps the prepared statements warm across the batch.
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        let mut conflicts = BatchConflicts::default();

        for (url, url_id) in urls {
            conflicts.record(restore_or_insert(&mut conn, url, url_id, user_id).await)?;
        }

        if conflicts.count() > 0 {
            warn!(
                user_id,
                conflicts = conflicts.count(),
                total = urls.len(),
                "batch insert had conflicts"
            );
        }
        conflicts.finish()
    }

    async fn delete_many(&self, user_id: UserId, url_ids: &[String]) -> Result<()> {
        if url_ids.is_empty() {
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            UPDATE urls
            SET is_deleted = TRUE
            WHERE user_id = $1
              AND url_id = ANY($2)
              AND NOT is_deleted
            "#,
        )
        .bind(i64::from(user_id))
        .bind(url_ids)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(user_id, requested = url_ids.len(), deleted = result.rows_affected(), "deleted urls");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("TRUNCATE urls")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
