use crate::error::Result;
use crate::record::{Record, Stats, UserId};
use async_trait::async_trait;
use std::collections::HashMap;

/// A read-only view of a link store.
///
/// Split from [`Storage`] so components that only resolve links can be
/// handed a narrower capability.
#[async_trait]
pub trait ReadStorage: Send + Sync + 'static {
    /// Looks up a link by its short identifier.
    ///
    /// Returns `Err(NotFound)` when no record exists and `Err(Deleted)` when
    /// the record exists but has been tombstoned.
    async fn get_url_by_id(&self, url_id: &str) -> Result<Record>;

    /// Returns every live link owned by `user_id`, in no particular order.
    ///
    /// An empty result is reported as `Err(NotFound)`.
    async fn get_urls_by_user(&self, user_id: UserId) -> Result<Vec<Record>>;

    /// Liveness probe. Never fails, any backend error yields `false`.
    async fn ping(&self) -> bool;

    /// Aggregate counts of live links and their owners.
    async fn stats(&self) -> Result<Stats>;
}

#[async_trait]
pub trait Storage: ReadStorage {
    /// Stores a link, restoring a tombstoned record for the same URL if any.
    ///
    /// Returns `Err(UniqueViolation)` if a live record already holds `url`.
    async fn add_url(&self, url: &str, url_id: &str, user_id: UserId) -> Result<()>;

    /// Stores many `url -> url_id` pairs for one owner.
    ///
    /// Each pair follows the rules of [`Storage::add_url`]. Conflicting pairs
    /// do not prevent the others from being stored; the first conflict is
    /// reported once the whole batch has been attempted.
    async fn add_url_batch(&self, urls: &HashMap<String, String>, user_id: UserId) -> Result<()>;

    /// Tombstones every listed id owned by `user_id`.
    ///
    /// Ids owned by someone else, unknown ids and already deleted ids are
    /// ignored.
    async fn delete_many(&self, user_id: UserId, url_ids: &[String]) -> Result<()>;

    /// Removes every record.
    async fn clear(&self) -> Result<()>;

    /// Releases connections and handles. Calling it twice is harmless.
    async fn close(&self);
}
