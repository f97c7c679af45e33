use anyhow::Context;
use clap::{Parser, ValueEnum};
use snip_deleter::DeleterConfig;
use snip_storage::{
    BackendConfig, PostgresConfig, RedisConfig, SqliteConfig, StorageConfig, TextLogConfig,
};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const STORAGE_BACKEND_ENV: &str = "SNIP_STORAGE_BACKEND";
pub const DSN_ENV: &str = "SNIP_DSN";
pub const POSTGRES_MAX_CONNECTIONS_ENV: &str = "SNIP_POSTGRES_MAX_CONNECTIONS";
pub const REDIS_ADDR_ENV: &str = "SNIP_REDIS_ADDR";
pub const REDIS_TTL_ENV: &str = "SNIP_REDIS_TTL_SECS";
pub const FILE_STORAGE_PATH_ENV: &str = "SNIP_FILE_STORAGE_PATH";
pub const TTL_IN_MEMORY_ENV: &str = "SNIP_TTL_IN_MEMORY_SECS";
pub const TTL_ON_DISK_ENV: &str = "SNIP_TTL_ON_DISK_SECS";
pub const CLEAR_ON_START_ENV: &str = "SNIP_CLEAR_ON_START";
pub const STORAGE_TIMEOUT_ENV: &str = "SNIP_STORAGE_TIMEOUT_MS";
pub const DELETE_FLUSH_INTERVAL_ENV: &str = "SNIP_DELETE_FLUSH_INTERVAL_SECS";
pub const DELETE_QUEUE_CAPACITY_ENV: &str = "SNIP_DELETE_QUEUE_CAPACITY";
pub const LOG_FORMAT_ENV: &str = "SNIP_LOG_FORMAT";

pub const DEFAULT_REDIS_ADDR: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_REDIS_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_FILE_STORAGE_PATH: &str = "snip.log";
pub const DEFAULT_TTL_IN_MEMORY_SECS: u64 = 60 * 60;
pub const DEFAULT_TTL_ON_DISK_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_POSTGRES_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_DELETE_FLUSH_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_DELETE_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "sqlite")]
    Sqlite,
    #[value(name = "postgres")]
    Postgres,
    #[value(name = "redis")]
    Redis,
    #[value(name = "text-log")]
    TextLog,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::Sqlite => write!(f, "sqlite"),
            StorageBackendArg::Postgres => write!(f, "postgres"),
            StorageBackendArg::Redis => write!(f, "redis"),
            StorageBackendArg::TextLog => write!(f, "text-log"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "snip-server")]
pub struct CLI {
    #[arg(
        long,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::TextLog
    )]
    pub storage: StorageBackendArg,

    /// Database DSN for the sqlite and postgres backends.
    #[arg(
        long,
        env = DSN_ENV,
        required_if_eq_any([("storage", "sqlite"), ("storage", "postgres")])
    )]
    pub dsn: Option<String>,

    #[arg(
        long,
        env = POSTGRES_MAX_CONNECTIONS_ENV,
        default_value_t = DEFAULT_POSTGRES_MAX_CONNECTIONS
    )]
    pub postgres_max_connections: u32,

    #[arg(long, env = REDIS_ADDR_ENV, default_value = DEFAULT_REDIS_ADDR)]
    pub redis_addr: String,

    #[arg(long, env = REDIS_TTL_ENV, default_value_t = DEFAULT_REDIS_TTL_SECS)]
    pub redis_ttl_secs: u64,

    #[arg(long, env = FILE_STORAGE_PATH_ENV, default_value = DEFAULT_FILE_STORAGE_PATH)]
    pub file_storage_path: PathBuf,

    #[arg(long, env = TTL_IN_MEMORY_ENV, default_value_t = DEFAULT_TTL_IN_MEMORY_SECS)]
    pub ttl_in_memory_secs: u64,

    #[arg(long, env = TTL_ON_DISK_ENV, default_value_t = DEFAULT_TTL_ON_DISK_SECS)]
    pub ttl_on_disk_secs: u64,

    /// Wipe the selected backend before serving.
    #[arg(long, env = CLEAR_ON_START_ENV)]
    pub clear_on_start: bool,

    /// Upper bound for every storage call, in milliseconds.
    #[arg(long, env = STORAGE_TIMEOUT_ENV)]
    pub storage_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = DELETE_FLUSH_INTERVAL_ENV,
        default_value_t = DEFAULT_DELETE_FLUSH_INTERVAL_SECS
    )]
    pub delete_flush_interval_secs: u64,

    #[arg(
        long,
        env = DELETE_QUEUE_CAPACITY_ENV,
        default_value_t = DEFAULT_DELETE_QUEUE_CAPACITY
    )]
    pub delete_queue_capacity: usize,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl CLI {
    pub fn storage_config(&self) -> anyhow::Result<StorageConfig> {
        let backend = match self.storage {
            StorageBackendArg::Sqlite => BackendConfig::Sqlite(
                SqliteConfig::builder()
                    .dsn(self.required_dsn()?)
                    .clear_on_start(self.clear_on_start)
                    .build(),
            ),
            StorageBackendArg::Postgres => BackendConfig::Postgres(
                PostgresConfig::builder()
                    .dsn(self.required_dsn()?)
                    .clear_on_start(self.clear_on_start)
                    .max_connections(self.postgres_max_connections)
                    .build(),
            ),
            StorageBackendArg::Redis => BackendConfig::Redis(
                RedisConfig::builder()
                    .addr(self.redis_addr.as_str())
                    .ttl(Duration::from_secs(self.redis_ttl_secs))
                    .clear_on_start(self.clear_on_start)
                    .build(),
            ),
            StorageBackendArg::TextLog => BackendConfig::TextLog(
                TextLogConfig::builder()
                    .file_storage_path(self.file_storage_path.clone())
                    .ttl_in_memory(Duration::from_secs(self.ttl_in_memory_secs))
                    .ttl_on_disk(Duration::from_secs(self.ttl_on_disk_secs))
                    .clear_on_start(self.clear_on_start)
                    .build(),
            ),
        };

        Ok(StorageConfig {
            backend,
            timeout: self.storage_timeout_ms.map(Duration::from_millis),
        })
    }

    pub fn deleter_config(&self) -> DeleterConfig {
        DeleterConfig::builder()
            .flush_interval(Duration::from_secs(self.delete_flush_interval_secs))
            .queue_capacity(self.delete_queue_capacity)
            .build()
    }

    fn required_dsn(&self) -> anyhow::Result<&str> {
        self.dsn
            .as_deref()
            .with_context(|| format!("--dsn is required for the {} backend", self.storage))
    }
}
