use snip_core::StorageError;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use typed_builder::TypedBuilder;

pub const DEFAULT_POSTGRES_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_REDIS_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_TTL_IN_MEMORY: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_TTL_ON_DISK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Names of the available storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
    Redis,
    TextLog,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::Postgres => "postgres",
            Backend::Redis => "redis",
            Backend::TextLog => "textlog",
        }
    }
}

impl Display for Backend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Backend::Sqlite),
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            "redis" => Ok(Backend::Redis),
            "textlog" | "text-log" | "file" => Ok(Backend::TextLog),
            other => Err(StorageError::Operation(format!(
                "unknown storage backend '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct SqliteConfig {
    /// e.g. `sqlite://snip.db` or `sqlite::memory:`.
    #[builder(setter(into))]
    pub dsn: String,
    #[builder(default = false)]
    pub clear_on_start: bool,
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct PostgresConfig {
    #[builder(setter(into))]
    pub dsn: String,
    #[builder(default = false)]
    pub clear_on_start: bool,
    #[builder(default = DEFAULT_POSTGRES_MAX_CONNECTIONS)]
    pub max_connections: u32,
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct RedisConfig {
    /// e.g. `redis://127.0.0.1:6379`.
    #[builder(setter(into))]
    pub addr: String,
    /// Expiry applied to both link directions.
    #[builder(default = DEFAULT_REDIS_TTL)]
    pub ttl: Duration,
    #[builder(default = false)]
    pub clear_on_start: bool,
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct TextLogConfig {
    #[builder(setter(into))]
    pub file_storage_path: PathBuf,
    /// How long a record stays in the in-memory working set after its last read.
    #[builder(default = DEFAULT_TTL_IN_MEMORY)]
    pub ttl_in_memory: Duration,
    /// How long a record survives compaction after its last read. Also the
    /// compaction period.
    #[builder(default = DEFAULT_TTL_ON_DISK)]
    pub ttl_on_disk: Duration,
    #[builder(default = false)]
    pub clear_on_start: bool,
}

/// Backend selection plus that backend's settings.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Sqlite(SqliteConfig),
    Postgres(PostgresConfig),
    Redis(RedisConfig),
    TextLog(TextLogConfig),
}

impl BackendConfig {
    pub fn backend(&self) -> Backend {
        match self {
            BackendConfig::Sqlite(_) => Backend::Sqlite,
            BackendConfig::Postgres(_) => Backend::Postgres,
            BackendConfig::Redis(_) => Backend::Redis,
            BackendConfig::TextLog(_) => Backend::TextLog,
        }
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct StorageConfig {
    pub backend: BackendConfig,
    /// Upper bound for every storage call. `None` leaves calls unbounded.
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_round_trip() {
        for backend in [
            Backend::Sqlite,
            Backend::Postgres,
            Backend::Redis,
            Backend::TextLog,
        ] {
            assert_eq!(backend.as_str().parse::<Backend>().unwrap(), backend);
        }
    }

    #[test]
    fn backend_aliases() {
        assert_eq!("PostgreSQL".parse::<Backend>().unwrap(), Backend::Postgres);
        assert_eq!("file".parse::<Backend>().unwrap(), Backend::TextLog);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = "mongo".parse::<Backend>().unwrap_err();
        assert!(err.to_string().contains("mongo"));
    }

    #[test]
    fn builder_defaults() {
        let config = TextLogConfig::builder()
            .file_storage_path("/tmp/snip.log")
            .build();
        assert_eq!(config.ttl_in_memory, DEFAULT_TTL_IN_MEMORY);
        assert_eq!(config.ttl_on_disk, DEFAULT_TTL_ON_DISK);
        assert!(!config.clear_on_start);

        let storage = StorageConfig::builder()
            .backend(BackendConfig::TextLog(config))
            .build();
        assert_eq!(storage.backend.backend(), Backend::TextLog);
        assert!(storage.timeout.is_none());
    }
}
