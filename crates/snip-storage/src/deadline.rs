use async_trait::async_trait;
use snip_core::{ReadStorage, Result, Record, Stats, Storage, StorageError, UserId};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// A storage decorator that bounds every call with a timeout.
///
/// When the timeout elapses the inner call is dropped and
/// `StorageError::Timeout` is returned. Only that call is affected.
#[derive(Debug, Clone)]
pub struct Deadline<S> {
    inner: S,
    timeout: Duration,
}

impl<S: Storage> Deadline<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout = ?self.timeout, "storage call timed out");
                Err(StorageError::Timeout(format!(
                    "{operation} exceeded {:?}",
                    self.timeout
                )))
            }
        }
    }
}

#[async_trait]
impl<S: Storage> ReadStorage for Deadline<S> {
    async fn get_url_by_id(&self, url_id: &str) -> Result<Record> {
        self.bounded("get_url_by_id", self.inner.get_url_by_id(url_id))
            .await
    }

    async fn get_urls_by_user(&self, user_id: UserId) -> Result<Vec<Record>> {
        self.bounded("get_urls_by_user", self.inner.get_urls_by_user(user_id))
            .await
    }

    async fn ping(&self) -> bool {
        tokio::time::timeout(self.timeout, self.inner.ping())
            .await
            .unwrap_or(false)
    }

    async fn stats(&self) -> Result<Stats> {
        self.bounded("stats", self.inner.stats()).await
    }
}

#[async_trait]
impl<S: Storage> Storage for Deadline<S> {
    async fn add_url(&self, url: &str, url_id: &str, user_id: UserId) -> Result<()> {
        self.bounded("add_url", self.inner.add_url(url, url_id, user_id))
            .await
    }

    async fn add_url_batch(&self, urls: &HashMap<String, String>, user_id: UserId) -> Result<()> {
        self.bounded("add_url_batch", self.inner.add_url_batch(urls, user_id))
            .await
    }

    async fn delete_many(&self, user_id: UserId, url_ids: &[String]) -> Result<()> {
        self.bounded("delete_many", self.inner.delete_many(user_id, url_ids))
            .await
    }

    async fn clear(&self) -> Result<()> {
        self.bounded("clear", self.inner.clear()).await
    }

    async fn close(&self) {
        // closing is never cut short
        self.inner.close().await;
    }
}
