use crate::batch::BatchConflicts;
use crate::config::SqliteConfig;
use crate::sql::{
    count_to_u64, is_unique_violation, lookup_result, map_sqlx_error, now_unix_seconds,
    user_records, UrlRow, URL_COLUMNS,
};
use async_trait::async_trait;
use snip_core::{ReadStorage, Result, Record, Stats, Storage, StorageError, UserId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Creates the `urls` table and its indexes, optionally wiping existing rows.
pub async fn init_schema(pool: &SqlitePool, clear_on_start: bool) -> Result<()> {
    sqlx::raw_sql(include_str!("../ddl/sqlite/urls.sql"))
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;

    if clear_on_start {
        info!("clearing sqlite storage on start");
        sqlx::query("DELETE FROM urls")
            .execute(pool)
            .await
            .map_err(map_sqlx_error)?;
    }

    Ok(())
}

/// SQLite implementation of the storage contract over a single connection.
///
/// All statements are serialized on one connection, which also keeps
/// `sqlite::memory:` databases alive for the lifetime of the storage.
/// Bulk deletes run one statement per id inside a transaction.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Creates a storage from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens the database named by `config.dsn`, creating the file if needed.
    ///
    /// The schema is not touched; call [`init_schema`] once afterwards.
    pub async fn connect(config: &SqliteConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.dsn)
            .map_err(map_sqlx_error)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Self::new(pool))
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn restore_or_insert(
    conn: &mut SqliteConnection,
    url: &str,
    url_id: &str,
    user_id: UserId,
) -> Result<()> {
    let now = now_unix_seconds();

    let restored = sqlx::query(
        r#"
        UPDATE urls
        SET is_deleted = FALSE, user_id = ?, url_id = ?, added = ?
        WHERE url = ?
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
        VALUES (?, ?, ?, ?, FALSE)
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
impl ReadStorage for SqliteStorage {
    async fn get_url_by_id(&self, url_id: &str) -> Result<Record> {
        let row = sqlx::query_as::<_, UrlRow>(&format!(
            "SELECT {URL_COLUMNS} FROM urls WHERE url_id = ? ORDER BY is_deleted ASC LIMIT 1"
        ))
        .bind(url_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        lookup_result(url_id, row)
    }

    async fn get_urls_by_user(&self, user_id: UserId) -> Result<Vec<Record>> {
        let rows = sqlx::query_as::<_, UrlRow>(&format!(
            "SELECT {URL_COLUMNS} FROM urls WHERE user_id = ? AND NOT is_deleted"
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
                warn!(error = %e, "sqlite ping failed");
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
impl Storage for SqliteStorage {
    async fn add_url(&self, url: &str, url_id: &str, user_id: UserId) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        restore_or_insert(&mut conn, url, url_id, user_id).await
    }

    async fn add_url_batch(&self, urls: &HashMap<String, String>, user_id: UserId) -> Result<()> {
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

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut deleted = 0;

        for url_id in url_ids {
            let result = sqlx::query(
                r#"
                UPDATE urls
                SET is_deleted = TRUE
                WHERE url_id = ?
                  AND user_id = ?
                  AND NOT is_deleted
                "#,
            )
            .bind(url_id)
            .bind(i64::from(user_id))
            .execute(&mut *tx)
            .await;

            match result {
                // Zero rows only means the id is not owned by this user.
                Ok(done) => deleted += done.rows_affected(),
                Err(err) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(error = %rollback, "failed to roll back delete transaction");
                    }
                    return Err(map_sqlx_error(err));
                }
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(user_id, requested = url_ids.len(), deleted, "deleted urls");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM urls")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
