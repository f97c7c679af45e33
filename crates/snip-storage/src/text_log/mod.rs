mod log_file;

use crate::batch::BatchConflicts;
use crate::config::TextLogConfig;
use async_trait::async_trait;
use jiff::Timestamp;
use log_file::LogFile;
use parking_lot::Mutex;
use snip_core::record::is_older_than;
use snip_core::{ReadStorage, Result, Record, Stats, Storage, StorageError, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

const MIN_COMPACTION_PERIOD: Duration = Duration::from_secs(1);

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Compaction {
    /// Records written back to the log.
    pub kept: usize,
    /// Records dropped because their last read is older than the on-disk TTL.
    pub expired: usize,
}

/// Hybrid storage: an in-memory working set in front of an append-only log.
///
/// The log file holds every record ever written, one JSON line each. Recently
/// written or read records are also kept in memory until their last read is
/// older than `ttl_in_memory`. Reads refresh `requested_at` but only stage the
/// new timestamp; it reaches the file with the next rewrite. Rewrites (deletes,
/// restores, compaction) replace the file atomically.
///
/// Every operation holds one exclusive lock for its whole duration, including
/// full-file rewrites. The file work runs on the blocking pool, so a caller
/// dropping its future cannot interrupt a rewrite half way.
#[derive(Debug, Clone)]
pub struct TextLogStorage {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    ttl_in_memory: Duration,
    ttl_on_disk: Duration,
}

#[derive(Debug)]
struct State {
    log: LogFile,
    hot: Vec<Record>,
    /// url -> refreshed `requested_at`, waiting for the next rewrite.
    pending: HashMap<String, Timestamp>,
}

impl TextLogStorage {
    /// Opens (or creates) the log at `config.file_storage_path`.
    pub fn open(config: &TextLogConfig) -> Result<Self> {
        let log = LogFile::open(&config.file_storage_path, config.clear_on_start)?;
        if config.clear_on_start {
            info!(path = %log.path().display(), "cleared text log on start");
        }

        // a record must leave memory no later than it expires on disk
        let ttl_in_memory = config.ttl_in_memory.min(config.ttl_on_disk);
        if ttl_in_memory < config.ttl_in_memory {
            warn!(
                ttl_in_memory = ?config.ttl_in_memory,
                ttl_on_disk = ?config.ttl_on_disk,
                "in-memory ttl exceeds on-disk ttl, clamping"
            );
        }

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    log,
                    hot: Vec::new(),
                    pending: HashMap::new(),
                }),
                ttl_in_memory,
                ttl_on_disk: config.ttl_on_disk,
            }),
        })
    }

    /// Number of records currently held in memory.
    pub fn hot_len(&self) -> usize {
        self.inner.state.lock().hot.len()
    }

    /// Rewrites the log without expired records and with every staged
    /// `requested_at` refresh applied.
    pub async fn update_storage(&self) -> Result<Compaction> {
        self.run(|inner| inner.compact()).await
    }

    /// Spawns the periodic compaction task, ticking every `ttl_on_disk`.
    ///
    /// The task only holds a weak reference and exits once the storage is
    /// dropped.
    pub fn spawn_compaction(&self) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.ttl_on_disk.max(MIN_COMPACTION_PERIOD);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("text log dropped, stopping compaction");
                    break;
                };

                match tokio::task::spawn_blocking(move || inner.compact()).await {
                    Ok(Ok(done)) => {
                        debug!(kept = done.kept, expired = done.expired, "text log compacted")
                    }
                    Ok(Err(e)) => error!(error = %e, "text log compaction failed"),
                    Err(e) => error!(error = %e, "text log compaction task panicked"),
                }
            }
        })
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(inner.as_ref()))
            .await
            .map_err(|e| StorageError::Operation(format!("text log task failed: {e}")))?
    }
}

impl Inner {
    fn is_expired_on_disk(
        &self,
        record: &Record,
        pending: &HashMap<String, Timestamp>,
        now: Timestamp,
    ) -> bool {
        is_older_than(effective_requested_at(record, pending), self.ttl_on_disk, now)
    }

    fn evict_hot(&self, state: &mut State, now: Timestamp) {
        let before = state.hot.len();
        state.hot.retain(|r| !r.is_stale(self.ttl_in_memory, now));
        let evicted = before - state.hot.len();
        if evicted > 0 {
            trace!(evicted, "evicted records from memory");
        }
    }

    fn insert_many(&self, pairs: Vec<(String, String)>, user_id: UserId) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let now = Timestamp::now();

        let mut records = state.log.read_all()?;
        let mut conflicts = BatchConflicts::default();
        let mut appended = Vec::new();
        let mut restored = Vec::new();

        for (url, url_id) in pairs {
            if let Some(existing) = records.iter_mut().find(|r| r.url == url) {
                let expired = is_older_than(
                    effective_requested_at(existing, &state.pending),
                    self.ttl_on_disk,
                    now,
                );
                if existing.is_deleted || expired {
                    existing.restore(url_id, user_id, now);
                    restored.push(existing.clone());
                } else {
                    conflicts.record(Err(StorageError::unique_violation(url, url_id, user_id)))?;
                }
                continue;
            }

            let mut record = Record::new(url, url_id, user_id);
            record.added = now;
            record.requested_at = now;
            appended.push(record);
        }

        if restored.is_empty() {
            state.log.append(&appended)?;
        } else {
            records.extend(appended.iter().cloned());
            rewrite(state, records)?;
            debug!(restored = restored.len(), user_id, "restored deleted urls");
        }

        for record in restored.into_iter().chain(appended) {
            state.hot.retain(|r| r.url != record.url);
            state.hot.push(record);
        }
        self.evict_hot(state, now);

        conflicts.finish()
    }

    fn get_by_id(&self, url_id: &str) -> Result<Record> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let now = Timestamp::now();
        self.evict_hot(state, now);

        if let Some(record) = state.hot.iter_mut().find(|r| r.url_id == url_id) {
            trace!(url_id, "text log memory hit");
            record.requested_at = now;
            state.pending.insert(record.url.clone(), now);
            return Ok(record.clone());
        }

        let mut deleted = false;
        for mut record in state.log.read_all()? {
            if record.url_id != url_id || self.is_expired_on_disk(&record, &state.pending, now) {
                continue;
            }
            if record.is_deleted {
                deleted = true;
                continue;
            }

            trace!(url_id, "text log disk hit");
            record.requested_at = now;
            state.pending.insert(record.url.clone(), now);
            state.hot.push(record.clone());
            return Ok(record);
        }

        if deleted {
            Err(StorageError::Deleted(url_id.to_string()))
        } else {
            Err(StorageError::NotFound(url_id.to_string()))
        }
    }

    fn get_by_user(&self, user_id: UserId) -> Result<Vec<Record>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let now = Timestamp::now();
        self.evict_hot(state, now);

        let mut found = Vec::new();
        let mut seen = HashSet::new();
        for record in state.hot.iter_mut().filter(|r| r.user_id == user_id) {
            record.requested_at = now;
            state.pending.insert(record.url.clone(), now);
            seen.insert(record.url.clone());
            found.push(record.clone());
        }

        for mut record in state.log.read_all()? {
            if record.user_id != user_id
                || record.is_deleted
                || seen.contains(&record.url)
                || self.is_expired_on_disk(&record, &state.pending, now)
            {
                continue;
            }

            record.requested_at = now;
            state.pending.insert(record.url.clone(), now);
            seen.insert(record.url.clone());
            state.hot.push(record.clone());
            found.push(record);
        }

        if found.is_empty() {
            return Err(StorageError::NotFound(format!("no urls for user {user_id}")));
        }
        Ok(found)
    }

    fn delete_many(&self, user_id: UserId, url_ids: &[String]) -> Result<()> {
        let ids: HashSet<&str> = url_ids.iter().map(String::as_str).collect();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        state
            .hot
            .retain(|r| !(r.user_id == user_id && ids.contains(r.url_id.as_str())));

        let mut records = state.log.read_all()?;
        let mut deleted = 0usize;
        for record in records.iter_mut() {
            if record.user_id == user_id && !record.is_deleted && ids.contains(record.url_id.as_str()) {
                record.is_deleted = true;
                deleted += 1;
            }
        }

        if deleted > 0 {
            rewrite(state, records)?;
        }
        debug!(user_id, requested = url_ids.len(), deleted, "deleted urls");
        Ok(())
    }

    fn compact(&self) -> Result<Compaction> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let now = Timestamp::now();

        let mut records = state.log.read_all()?;
        apply_pending(&mut records, &state.pending);

        let before = records.len();
        records.retain(|r| !r.is_stale(self.ttl_on_disk, now));
        let done = Compaction {
            kept: records.len(),
            expired: before - records.len(),
        };

        state.log.replace(&records)?;
        state.pending.clear();
        Ok(done)
    }

    fn stats(&self) -> Result<Stats> {
        let state = self.state.lock();
        let now = Timestamp::now();

        let mut urls = 0u64;
        let mut users = HashSet::new();
        for record in state.log.read_all()? {
            if record.is_deleted || self.is_expired_on_disk(&record, &state.pending, now) {
                continue;
            }
            urls += 1;
            users.insert(record.user_id);
        }

        Ok(Stats {
            urls,
            users: users.len() as u64,
        })
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.log.truncate()?;
        state.hot.clear();
        state.pending.clear();
        Ok(())
    }
}

fn effective_requested_at(record: &Record, pending: &HashMap<String, Timestamp>) -> Timestamp {
    match pending.get(&record.url) {
        Some(&refreshed) => refreshed.max(record.requested_at),
        None => record.requested_at,
    }
}

fn apply_pending(records: &mut [Record], pending: &HashMap<String, Timestamp>) {
    for record in records.iter_mut() {
        record.requested_at = effective_requested_at(record, pending);
    }
}

/// Persists `records` as the new log content, folding in staged refreshes.
///
/// Staged refreshes are only dropped once the replace succeeded.
fn rewrite(state: &mut State, mut records: Vec<Record>) -> Result<()> {
    apply_pending(&mut records, &state.pending);
    state.log.replace(&records)?;
    state.pending.clear();
    Ok(())
}

#[async_trait]
impl ReadStorage for TextLogStorage {
    async fn get_url_by_id(&self, url_id: &str) -> Result<Record> {
        let url_id = url_id.to_string();
        self.run(move |inner| inner.get_by_id(&url_id)).await
    }

    async fn get_urls_by_user(&self, user_id: UserId) -> Result<Vec<Record>> {
        self.run(move |inner| inner.get_by_user(user_id)).await
    }

    async fn ping(&self) -> bool {
        // the lock may be held for a whole rewrite, so wait off the runtime
        self.run(|inner| Ok(inner.state.lock().log.exists()))
            .await
            .unwrap_or(false)
    }

    async fn stats(&self) -> Result<Stats> {
        self.run(|inner| inner.stats()).await
    }
}

#[async_trait]
impl Storage for TextLogStorage {
    async fn add_url(&self, url: &str, url_id: &str, user_id: UserId) -> Result<()> {
        let pairs = vec![(url.to_string(), url_id.to_string())];
        self.run(move |inner| inner.insert_many(pairs, user_id)).await
    }

    async fn add_url_batch(&self, urls: &HashMap<String, String>, user_id: UserId) -> Result<()> {
        let pairs: Vec<_> = urls
            .iter()
            .map(|(url, url_id)| (url.clone(), url_id.clone()))
            .collect();
        self.run(move |inner| inner.insert_many(pairs, user_id)).await
    }

    async fn delete_many(&self, user_id: UserId, url_ids: &[String]) -> Result<()> {
        if url_ids.is_empty() {
            return Ok(());
        }
        let url_ids = url_ids.to_vec();
        self.run(move |inner| inner.delete_many(user_id, &url_ids)).await
    }

    async fn clear(&self) -> Result<()> {
        self.run(|inner| inner.clear()).await
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadline::Deadline;
    use std::fs;

    fn config(dir: &tempfile::TempDir) -> TextLogConfig {
        TextLogConfig::builder()
            .file_storage_path(dir.path().join("links.log"))
            .build()
    }

    #[tokio::test]
    async fn reads_are_staged_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TextLogStorage::open(&config(&dir)).unwrap();
        storage.add_url("https://example.com/a", "abc123", 7).await.unwrap();
        let on_disk = fs::read_to_string(dir.path().join("links.log")).unwrap();

        let read = storage.get_url_by_id("abc123").await.unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("links.log")).unwrap(), on_disk);
        assert_eq!(storage.inner.state.lock().pending.get("https://example.com/a"), Some(&read.requested_at));
    }

    #[tokio::test]
    async fn compaction_persists_staged_reads() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TextLogStorage::open(&config(&dir)).unwrap();
        storage.add_url("https://example.com/a", "abc123", 7).await.unwrap();
        let read = storage.get_url_by_id("abc123").await.unwrap();

        let done = storage.update_storage().await.unwrap();

        assert_eq!(done, Compaction { kept: 1, expired: 0 });
        assert!(storage.inner.state.lock().pending.is_empty());
        let records = storage.inner.state.lock().log.read_all().unwrap();
        assert_eq!(records[0].requested_at, read.requested_at);
    }

    #[tokio::test]
    async fn corrupted_log_aborts_compaction_and_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TextLogStorage::open(&config(&dir)).unwrap();
        storage.add_url("https://example.com/a", "abc123", 7).await.unwrap();
        let path = dir.path().join("links.log");
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("garbage\n");
        fs::write(&path, &content).unwrap();

        let err = storage.update_storage().await.unwrap_err();

        assert!(matches!(err, StorageError::Corruption { line: 2, .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), content);
    }

    #[tokio::test]
    async fn ping_requires_the_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TextLogStorage::open(&config(&dir)).unwrap();
        assert!(storage.ping().await);

        fs::remove_file(dir.path().join("links.log")).unwrap();

        assert!(!storage.ping().await);
    }

    #[tokio::test]
    async fn ping_honours_a_deadline_while_the_log_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TextLogStorage::open(&config(&dir)).unwrap();

        let inner = Arc::clone(&storage.inner);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = inner.state.lock();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_secs(2));
        });
        locked_rx.recv().unwrap();

        let bounded = Deadline::new(storage.clone(), Duration::from_millis(100));
        let started = std::time::Instant::now();
        let alive = bounded.ping().await;

        assert!(!alive);
        assert!(started.elapsed() < Duration::from_secs(1));
        holder.join().unwrap();
        assert!(storage.ping().await);
    }

    #[test]
    fn memory_ttl_is_clamped_to_disk_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TextLogStorage::open(
            &TextLogConfig::builder()
                .file_storage_path(dir.path().join("links.log"))
                .ttl_in_memory(Duration::from_secs(10))
                .ttl_on_disk(Duration::from_millis(200))
                .build(),
        )
        .unwrap();

        assert_eq!(storage.inner.ttl_in_memory, Duration::from_millis(200));
    }

    #[tokio::test]
    async fn compaction_task_stops_with_the_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TextLogStorage::open(
            &TextLogConfig::builder()
                .file_storage_path(dir.path().join("links.log"))
                .ttl_on_disk(Duration::from_millis(10))
                .build(),
        )
        .unwrap();

        let task = storage.spawn_compaction();
        drop(storage);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("compaction task should exit")
            .unwrap();
    }
}
