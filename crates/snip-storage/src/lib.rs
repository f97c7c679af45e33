//! Storage backends for Snip.
//!
//! Every backend implements the [`Storage`] contract from `snip_core`.
//! Callers normally go through [`open`], which picks and builds a backend
//! from a [`StorageConfig`].

mod batch;
pub mod config;
pub mod deadline;
pub mod facade;
pub mod postgres;
pub mod redis;
mod sql;
pub mod sqlite;
pub mod text_log;

pub use config::{
    Backend, BackendConfig, PostgresConfig, RedisConfig, SqliteConfig, StorageConfig,
    TextLogConfig,
};
pub use deadline::Deadline;
pub use facade::open;
pub use postgres::PostgresStorage;
pub use self::redis::RedisStorage;
pub use snip_core::{ReadStorage, Record, Stats, Storage, StorageError, UserId};
pub use sqlite::SqliteStorage;
pub use text_log::{Compaction, TextLogStorage};
