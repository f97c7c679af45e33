use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque owner identifier handed over by the authentication layer.
pub type UserId = u32;

/// A stored short link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The original long URL.
    pub url: String,
    /// The short identifier derived from `url`.
    pub url_id: String,
    /// The owner of the link.
    pub user_id: UserId,
    /// When the link was created (or last restored).
    pub added: Timestamp,
    /// When the link was last read.
    pub requested_at: Timestamp,
    /// Soft-delete flag.
    #[serde(default)]
    pub is_deleted: bool,
}

impl Record {
    /// Creates a live record stamped with the current time.
    pub fn new(url: impl Into<String>, url_id: impl Into<String>, user_id: UserId) -> Self {
        let now = Timestamp::now();
        Self {
            url: url.into(),
            url_id: url_id.into(),
            user_id,
            added: now,
            requested_at: now,
            is_deleted: false,
        }
    }

    /// Returns `true` when the last read happened more than `ttl` before `now`.
    pub fn is_stale(&self, ttl: Duration, now: Timestamp) -> bool {
        is_older_than(self.requested_at, ttl, now)
    }

    /// Brings a tombstoned record back to life for a new owner.
    pub fn restore(&mut self, url_id: impl Into<String>, user_id: UserId, now: Timestamp) {
        self.url_id = url_id.into();
        self.user_id = user_id;
        self.is_deleted = false;
        self.added = now;
        self.requested_at = now;
    }
}

/// Returns `true` when `at` lies more than `ttl` in the past relative to `now`.
pub fn is_older_than(at: Timestamp, ttl: Duration, now: Timestamp) -> bool {
    // A TTL too large for a signed duration never expires.
    let Ok(ttl) = SignedDuration::try_from(ttl) else {
        return false;
    };
    now.duration_since(at) > ttl
}

/// Aggregate counts for operational reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Number of live links.
    pub urls: u64,
    /// Number of distinct owners of live links.
    pub users: u64,
}
