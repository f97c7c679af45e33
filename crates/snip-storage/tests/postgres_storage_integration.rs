#[macro_use]
mod common;

use snip_storage::postgres::init_schema;
use snip_storage::{PostgresConfig, PostgresStorage, ReadStorage, Storage, StorageError};
use snip_test_infra::postgres::{PostgresConfig as ServerConfig, PostgresServer};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    _postgres: PostgresServer,
    storage: PostgresStorage,
}

impl Fixture {
    async fn start() -> Self {
        let postgres = PostgresServer::new(ServerConfig::builder().build())
            .await
            .expect("start postgres");
        let dsn = postgres.database_url().await.expect("postgres url");
        let storage = connect_with_retry(&dsn).await;

        init_schema(storage.pool(), false)
            .await
            .expect("create schema");

        Self {
            _postgres: postgres,
            storage,
        }
    }

    fn storage(&self) -> &dyn Storage {
        &self.storage
    }
}

async fn connect_with_retry(dsn: &str) -> PostgresStorage {
    let config = PostgresConfig::builder().dsn(dsn).max_connections(5).build();
    let mut last_error = None;

    for _ in 0..20 {
        match PostgresStorage::connect(&config).await {
            Ok(storage) => return storage,
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    panic!("failed to connect postgres: {last_error:?}");
}

contract_tests!(
    ignore = "requires a container runtime";
    Fixture::start;
    add_and_get,
    unknown_id_is_not_found,
    duplicate_url_conflicts,
    delete_marks_records_deleted,
    delete_ignores_foreign_ids,
    delete_is_idempotent,
    restore_after_delete,
    list_by_user,
    batch_keeps_non_conflicting_rows,
    batch_restores_deleted_rows,
    stats_count_live_records,
    clear_removes_everything,
    ping_reports_alive,
);

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn spawned_adds_use_the_pool() {
    let fixture = Fixture::start().await;
    let storage: Arc<dyn Storage> = Arc::new(fixture.storage.clone());
    common::spawned_distinct_adds(storage).await;
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn init_schema_is_repeatable_and_can_clear() {
    let fixture = Fixture::start().await;
    fixture
        .storage
        .add_url("https://example.com/a", "a1", 7)
        .await
        .unwrap();

    init_schema(fixture.storage.pool(), false).await.unwrap();
    assert_eq!(fixture.storage.stats().await.unwrap().urls, 1);

    init_schema(fixture.storage.pool(), true).await.unwrap();
    assert_eq!(fixture.storage.stats().await.unwrap().urls, 0);
}

#[tokio::test]
#[ignore = "requires a container runtime"]
async fn closed_pool_is_unavailable() {
    let fixture = Fixture::start().await;
    fixture.storage.close().await;

    assert!(!fixture.storage.ping().await);
    let err = fixture.storage.get_url_by_id("a1").await.unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));
}
