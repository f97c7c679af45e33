use crate::config::DeleterConfig;
use crate::queue::{DeleteJob, DeleteQueue};
use snip_core::{Storage, UserId};
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Lifecycle of the deletion worker. Moves strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    /// No new jobs are accepted; queued ones are being flushed.
    Draining,
    Stopped,
}

/// Starts the deletion worker on the current tokio runtime.
pub fn spawn(storage: Arc<dyn Storage>, config: DeleterConfig) -> (DeleteQueue, WorkerHandle) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (state_tx, state_rx) = watch::channel(WorkerState::Running);

    let worker = DeleteWorker {
        storage,
        rx,
        pending: HashMap::new(),
        state: state_tx,
        flush_interval: config.flush_interval,
    };
    info!(
        flush_interval = ?config.flush_interval,
        queue_capacity = config.queue_capacity,
        "starting delete worker"
    );
    let task = tokio::spawn(worker.run(shutdown_rx));

    let handle = WorkerHandle {
        shutdown: shutdown_tx,
        state: state_rx,
        task,
    };
    (DeleteQueue::new(tx), handle)
}

/// Owner side of the worker: observes its state and shuts it down.
///
/// Dropping the handle without calling [`shutdown`](Self::shutdown) also
/// makes the worker drain and stop, but nothing waits for it.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: oneshot::Sender<()>,
    state: watch::Receiver<WorkerState>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// A receiver that sees every state change.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    /// Stops the worker after every already queued job has been flushed.
    pub async fn shutdown(self) {
        // the worker may already be gone if every queue was dropped
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            error!(error = %e, "delete worker task failed");
        }
    }
}

struct DeleteWorker {
    storage: Arc<dyn Storage>,
    rx: mpsc::Receiver<DeleteJob>,
    pending: HashMap<UserId, Vec<String>>,
    state: watch::Sender<WorkerState>,
    flush_interval: Duration,
}

impl DeleteWorker {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                job = self.rx.recv() => match job {
                    Some(job) => self.enqueue(job),
                    None => {
                        debug!("every delete queue was dropped");
                        break;
                    }
                },
                _ = ticker.tick() => self.flush().await,
                _ = &mut shutdown => {
                    info!("delete worker shutting down");
                    break;
                }
            }
        }

        self.drain().await;
    }

    async fn drain(mut self) {
        self.state.send_replace(WorkerState::Draining);
        self.rx.close();
        while let Some(job) = self.rx.recv().await {
            self.enqueue(job);
        }

        self.flush().await;
        self.state.send_replace(WorkerState::Stopped);
        info!("delete worker stopped");
    }

    fn enqueue(&mut self, job: DeleteJob) {
        self.pending.entry(job.user_id).or_default().push(job.url_id);
    }

    async fn flush(&mut self) {
        let batch = mem::take(&mut self.pending);
        if batch.is_empty() {
            return;
        }

        debug!(users = batch.len(), "flushing queued deletes");
        for (user_id, url_ids) in batch {
            match self.storage.delete_many(user_id, &url_ids).await {
                Ok(()) => debug!(user_id, count = url_ids.len(), "deleted urls"),
                Err(e) => error!(
                    user_id,
                    count = url_ids.len(),
                    error = %e,
                    "failed to delete urls"
                ),
            }
        }
    }
}
