//! Behaviour every full-featured backend must share.
//!
//! Each case takes an empty storage. Backend test files instantiate the
//! cases with [`contract_tests!`].

#![allow(dead_code)]

use snip_core::{ReadStorage, Storage, StorageError};
use std::collections::HashMap;
use std::sync::Arc;

/// Expands to one `#[tokio::test]` per listed case, each calling
/// `common::<case>` with a fresh storage from `$fixture`.
///
/// A leading `ignore = "reason";` marks every generated test ignored.
#[macro_export]
macro_rules! contract_tests {
    (ignore = $reason:literal; $fixture:path; $($case:ident),* $(,)?) => {
        $(
            #[tokio::test]
            #[ignore = $reason]
            async fn $case() {
                let fixture = $fixture().await;
                common::$case(fixture.storage()).await;
            }
        )*
    };
    ($fixture:path; $($case:ident),* $(,)?) => {
        $(
            #[tokio::test]
            async fn $case() {
                let fixture = $fixture().await;
                common::$case(fixture.storage()).await;
            }
        )*
    };
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub async fn add_and_get(storage: &dyn Storage) {
    storage
        .add_url("https://example.com/a", "abc123", 7)
        .await
        .unwrap();

    let record = storage.get_url_by_id("abc123").await.unwrap();
    assert_eq!(record.url, "https://example.com/a");
    assert_eq!(record.url_id, "abc123");
    assert_eq!(record.user_id, 7);
    assert!(!record.is_deleted);
}

pub async fn unknown_id_is_not_found(storage: &dyn Storage) {
    let err = storage.get_url_by_id("missing").await.unwrap_err();
    assert_eq!(err, StorageError::NotFound("missing".to_string()));
}

pub async fn duplicate_url_conflicts(storage: &dyn Storage) {
    storage
        .add_url("https://example.com/a", "abc123", 7)
        .await
        .unwrap();

    let err = storage
        .add_url("https://example.com/a", "abc123", 9)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        StorageError::unique_violation("https://example.com/a", "abc123", 9)
    );
    assert_eq!(storage.get_url_by_id("abc123").await.unwrap().user_id, 7);
}

pub async fn delete_marks_records_deleted(storage: &dyn Storage) {
    storage.add_url("https://example.com/a", "a1", 7).await.unwrap();
    storage.add_url("https://example.com/b", "b1", 7).await.unwrap();
    storage.add_url("https://example.com/c", "c1", 7).await.unwrap();

    storage.delete_many(7, &ids(&["a1", "b1"])).await.unwrap();

    for id in ["a1", "b1"] {
        assert_eq!(
            storage.get_url_by_id(id).await.unwrap_err(),
            StorageError::Deleted(id.to_string())
        );
    }
    assert!(storage.get_url_by_id("c1").await.is_ok());
}

pub async fn delete_ignores_foreign_ids(storage: &dyn Storage) {
    storage.add_url("https://example.com/a", "a1", 7).await.unwrap();

    storage.delete_many(9, &ids(&["a1", "nope"])).await.unwrap();

    let record = storage.get_url_by_id("a1").await.unwrap();
    assert_eq!(record.user_id, 7);
    assert_eq!(storage.get_urls_by_user(7).await.unwrap().len(), 1);
}

pub async fn delete_is_idempotent(storage: &dyn Storage) {
    storage.add_url("https://example.com/a", "a1", 7).await.unwrap();
    storage.add_url("https://example.com/b", "b1", 7).await.unwrap();

    storage.delete_many(7, &ids(&["a1"])).await.unwrap();
    let once = storage.stats().await.unwrap();
    storage.delete_many(7, &ids(&["a1"])).await.unwrap();

    assert_eq!(storage.stats().await.unwrap(), once);
    assert_eq!(
        storage.get_url_by_id("a1").await.unwrap_err(),
        StorageError::Deleted("a1".to_string())
    );
    assert!(storage.get_url_by_id("b1").await.is_ok());
}

pub async fn restore_after_delete(storage: &dyn Storage) {
    storage.add_url("https://example.com/a", "abc123", 7).await.unwrap();
    storage.delete_many(7, &ids(&["abc123"])).await.unwrap();

    storage.add_url("https://example.com/a", "abc123", 9).await.unwrap();

    let record = storage.get_url_by_id("abc123").await.unwrap();
    assert_eq!(record.user_id, 9);
    assert!(!record.is_deleted);
    assert!(matches!(
        storage.get_urls_by_user(7).await,
        Err(StorageError::NotFound(_))
    ));
    assert_eq!(storage.get_urls_by_user(9).await.unwrap().len(), 1);
}

pub async fn list_by_user(storage: &dyn Storage) {
    storage.add_url("https://example.com/a", "a1", 7).await.unwrap();
    storage.add_url("https://example.com/b", "b1", 7).await.unwrap();
    storage.add_url("https://example.com/c", "c1", 8).await.unwrap();
    storage.delete_many(7, &ids(&["b1"])).await.unwrap();

    let records = storage.get_urls_by_user(7).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].url_id, "a1");

    assert!(matches!(
        storage.get_urls_by_user(42).await,
        Err(StorageError::NotFound(_))
    ));
}

pub async fn batch_keeps_non_conflicting_rows(storage: &dyn Storage) {
    storage
        .add_url("https://example.com/3", "id3", 1)
        .await
        .unwrap();

    let batch: HashMap<String, String> = (1..=5)
        .map(|i| (format!("https://example.com/{i}"), format!("id{i}")))
        .collect();
    let err = storage.add_url_batch(&batch, 2).await.unwrap_err();

    assert_eq!(
        err,
        StorageError::unique_violation("https://example.com/3", "id3", 2)
    );
    for i in [1, 2, 4, 5] {
        let record = storage.get_url_by_id(&format!("id{i}")).await.unwrap();
        assert_eq!(record.user_id, 2);
    }
    assert_eq!(storage.get_url_by_id("id3").await.unwrap().user_id, 1);
    assert_eq!(storage.get_urls_by_user(2).await.unwrap().len(), 4);
}

pub async fn batch_restores_deleted_rows(storage: &dyn Storage) {
    storage.add_url("https://example.com/a", "a1", 1).await.unwrap();
    storage.delete_many(1, &ids(&["a1"])).await.unwrap();

    let batch = HashMap::from([
        ("https://example.com/a".to_string(), "a1".to_string()),
        ("https://example.com/b".to_string(), "b1".to_string()),
    ]);
    storage.add_url_batch(&batch, 2).await.unwrap();

    assert_eq!(storage.get_url_by_id("a1").await.unwrap().user_id, 2);
    assert_eq!(storage.get_url_by_id("b1").await.unwrap().user_id, 2);
    assert_eq!(storage.stats().await.unwrap().urls, 2);
}

pub async fn stats_count_live_records(storage: &dyn Storage) {
    storage.add_url("https://example.com/a", "a1", 1).await.unwrap();
    storage.add_url("https://example.com/b", "b1", 1).await.unwrap();
    storage.add_url("https://example.com/c", "c1", 2).await.unwrap();
    storage.add_url("https://example.com/d", "d1", 3).await.unwrap();
    storage.delete_many(3, &ids(&["d1"])).await.unwrap();

    let stats = storage.stats().await.unwrap();
    assert_eq!(stats.urls, 3);
    assert_eq!(stats.users, 2);
}

pub async fn clear_removes_everything(storage: &dyn Storage) {
    storage.add_url("https://example.com/a", "a1", 1).await.unwrap();
    storage.add_url("https://example.com/b", "b1", 2).await.unwrap();

    storage.clear().await.unwrap();

    assert!(matches!(
        storage.get_url_by_id("a1").await,
        Err(StorageError::NotFound(_))
    ));
    assert_eq!(storage.stats().await.unwrap().urls, 0);
    // a cleared store accepts the same urls again
    storage.add_url("https://example.com/a", "a1", 3).await.unwrap();
}

pub async fn ping_reports_alive(storage: &dyn Storage) {
    assert!(storage.ping().await);
}

/// Shares an owned storage with spawned tasks.
pub async fn spawned_distinct_adds(storage: Arc<dyn Storage>) {
    let mut handles = Vec::new();
    for i in 0..10u32 {
        let storage = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            storage
                .add_url(&format!("https://spawned.example/{i}"), &format!("sp{i}"), i)
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(storage.stats().await.unwrap().users, 10);
}
