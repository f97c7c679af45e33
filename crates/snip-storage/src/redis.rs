use crate::batch::BatchConflicts;
use crate::config::RedisConfig;
use async_trait::async_trait;
use jiff::Timestamp;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use snip_core::{ReadStorage, Result, Record, Stats, Storage, StorageError, UserId};
use std::collections::HashMap;
use tracing::{debug, info, trace, warn};

const DEFAULT_KEY_PREFIX: &str = "snip:";
const SCAN_COUNT: usize = 500;

/// Value stored under the reverse (`id -> url`) key.
#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    url: String,
    user_id: UserId,
    added: Timestamp,
}

fn map_redis_error(operation: &str, err: redis::RedisError) -> StorageError {
    let message = format!("{operation}: {err}");
    if err.is_timeout() {
        StorageError::Timeout(message)
    } else if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
        StorageError::Unavailable(message)
    } else {
        StorageError::Query(message)
    }
}

/// Redis implementation of the storage contract, the ephemeral cache tier.
///
/// Three keyspaces are maintained: `url -> id` and `id -> entry`, both
/// expiring after the configured TTL, and a counter of stored links that
/// never expires. The two link directions are written without a
/// transaction; a failure in between leaves an orphan that lives until its
/// TTL runs out.
///
/// This backend does not keep tombstones or an owner index: deletes are
/// physical (later lookups report `NotFound`), listing by user is
/// unsupported and stats only know the link counter.
#[derive(Clone)]
pub struct RedisStorage {
    conn: redis::aio::MultiplexedConnection,
    key_prefix: String,
    ttl_secs: u64,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("key_prefix", &self.key_prefix)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl RedisStorage {
    /// Creates a storage over an existing multiplexed connection.
    pub fn new(conn: redis::aio::MultiplexedConnection, config: &RedisConfig) -> Self {
        Self::with_prefix(conn, config, DEFAULT_KEY_PREFIX)
    }

    /// Creates a storage with a custom key prefix (e.g. `"tests:"`).
    pub fn with_prefix(
        conn: redis::aio::MultiplexedConnection,
        config: &RedisConfig,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
            // EX 0 is rejected by redis.
            ttl_secs: config.ttl.as_secs().max(1),
        }
    }

    /// Connects to `config.addr`.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.addr.as_str())
            .map_err(|e| map_redis_error("invalid redis address", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| map_redis_error("failed to connect to redis", e))?;

        let storage = Self::new(conn, config);
        if config.clear_on_start {
            info!("clearing redis storage on start");
            storage.clear().await?;
        }
        Ok(storage)
    }

    fn url_key(&self, url: &str) -> String {
        format!("{}url:{}", self.key_prefix, url)
    }

    fn id_key(&self, url_id: &str) -> String {
        format!("{}id:{}", self.key_prefix, url_id)
    }

    fn counter_key(&self) -> String {
        format!("{}count", self.key_prefix)
    }

    async fn load_entry(&self, url_id: &str) -> Result<Option<Entry>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(self.id_key(url_id))
            .await
            .map_err(|e| map_redis_error("failed to read url id", e))?;

        raw.map(|raw| {
            serde_json::from_str::<Entry>(&raw).map_err(|e| {
                StorageError::InvalidData(format!("invalid entry for url id '{url_id}': {e}"))
            })
        })
        .transpose()
    }
}

#[async_trait]
impl ReadStorage for RedisStorage {
    async fn get_url_by_id(&self, url_id: &str) -> Result<Record> {
        trace!(url_id, "fetching url from redis");
        let Some(entry) = self.load_entry(url_id).await? else {
            return Err(StorageError::NotFound(url_id.to_string()));
        };

        Ok(Record {
            url: entry.url,
            url_id: url_id.to_string(),
            user_id: entry.user_id,
            added: entry.added,
            requested_at: Timestamp::now(),
            is_deleted: false,
        })
    }

    async fn get_urls_by_user(&self, user_id: UserId) -> Result<Vec<Record>> {
        Err(StorageError::Unsupported(format!(
            "redis storage keeps no owner index (user {user_id})"
        )))
    }

    async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "redis ping failed");
                false
            }
        }
    }

    async fn stats(&self) -> Result<Stats> {
        let mut conn = self.conn.clone();
        let urls: Option<u64> = conn
            .get(self.counter_key())
            .await
            .map_err(|e| map_redis_error("failed to read counter", e))?;

        Ok(Stats {
            urls: urls.unwrap_or_default(),
            users: 0,
        })
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn add_url(&self, url: &str, url_id: &str, user_id: UserId) -> Result<()> {
        let mut conn = self.conn.clone();

        let claimed: Option<String> = redis::cmd("SET")
            .arg(self.url_key(url))
            .arg(url_id)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("failed to write url key", e))?;

        if claimed.is_none() {
            return Err(StorageError::unique_violation(url, url_id, user_id));
        }

        let entry = Entry {
            url: url.to_string(),
            user_id,
            added: Timestamp::now(),
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| StorageError::InvalidData(format!("failed to encode entry: {e}")))?;

        let () = conn
            .set_ex(self.id_key(url_id), json, self.ttl_secs)
            .await
            .map_err(|e| map_redis_error("failed to write url id key", e))?;

        let _: u64 = conn
            .incr(self.counter_key(), 1u64)
            .await
            .map_err(|e| map_redis_error("failed to bump counter", e))?;

        debug!(url_id, user_id, "stored url in redis");
        Ok(())
    }

    async fn add_url_batch(&self, urls: &HashMap<String, String>, user_id: UserId) -> Result<()> {
        let mut conflicts = BatchConflicts::default();
        for (url, url_id) in urls {
            conflicts.record(self.add_url(url, url_id, user_id).await)?;
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
        let mut conn = self.conn.clone();

        for url_id in url_ids {
            let Some(entry) = self.load_entry(url_id).await? else {
                continue;
            };
            if entry.user_id != user_id {
                continue;
            }

            let () = redis::pipe()
                .del(self.id_key(url_id))
                .ignore()
                .del(self.url_key(&entry.url))
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error("failed to delete url", e))?;
        }

        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.key_prefix);
        let mut cursor = 0u64;
        let mut removed = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error("failed to scan keys", e))?;

            if !keys.is_empty() {
                removed += keys.len();
                let () = conn
                    .del(keys)
                    .await
                    .map_err(|e| map_redis_error("failed to delete keys", e))?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(removed, "cleared redis storage");
        Ok(())
    }

    async fn close(&self) {}
}
