use crate::config::{BackendConfig, StorageConfig};
use crate::deadline::Deadline;
use crate::postgres::{self, PostgresStorage};
use crate::redis::RedisStorage;
use crate::sqlite::{self, SqliteStorage};
use crate::text_log::TextLogStorage;
use snip_core::{Result, Storage};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Builds the backend named by `config`.
///
/// Relational schemas are created here, and the text log gets its compaction
/// task. Any failure is returned as is: there is no fallback backend.
pub async fn open(config: StorageConfig) -> Result<Arc<dyn Storage>> {
    let backend = config.backend.backend();
    info!(%backend, timeout = ?config.timeout, "opening storage");

    let storage = match config.backend {
        BackendConfig::Sqlite(cfg) => {
            let storage = SqliteStorage::connect(&cfg).await?;
            sqlite::init_schema(storage.pool(), cfg.clear_on_start).await?;
            bounded(storage, config.timeout)
        }
        BackendConfig::Postgres(cfg) => {
            let storage = PostgresStorage::connect(&cfg).await?;
            postgres::init_schema(storage.pool(), cfg.clear_on_start).await?;
            bounded(storage, config.timeout)
        }
        BackendConfig::Redis(cfg) => bounded(RedisStorage::connect(&cfg).await?, config.timeout),
        BackendConfig::TextLog(cfg) => {
            let storage = TextLogStorage::open(&cfg)?;
            storage.spawn_compaction();
            bounded(storage, config.timeout)
        }
    };

    info!(%backend, "storage ready");
    Ok(storage)
}

fn bounded<S: Storage>(storage: S, timeout: Option<Duration>) -> Arc<dyn Storage> {
    match timeout {
        Some(timeout) => Arc::new(Deadline::new(storage, timeout)),
        None => Arc::new(storage),
    }
}
