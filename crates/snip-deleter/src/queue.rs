use crate::error::{DeleterError, Result};
use snip_core::UserId;
use tokio::sync::mpsc;
use tracing::trace;

/// A request to soft-delete one link on behalf of its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteJob {
    pub url_id: String,
    pub user_id: UserId,
}

impl DeleteJob {
    pub fn new(url_id: impl Into<String>, user_id: UserId) -> Self {
        Self {
            url_id: url_id.into(),
            user_id,
        }
    }
}

/// Producer side of the deletion pipeline. Cheap to clone.
///
/// Sends wait while the queue is full. Once the worker has started draining
/// or has stopped, every push fails with [`DeleterError::Closed`].
#[derive(Debug, Clone)]
pub struct DeleteQueue {
    tx: mpsc::Sender<DeleteJob>,
}

impl DeleteQueue {
    pub(crate) fn new(tx: mpsc::Sender<DeleteJob>) -> Self {
        Self { tx }
    }

    pub async fn push(&self, job: DeleteJob) -> Result<()> {
        trace!(url_id = %job.url_id, user_id = job.user_id, "queueing delete");
        self.tx.send(job).await.map_err(|_| DeleterError::Closed)
    }

    /// Queues every id in `url_ids` for `user_id`, stopping at the first
    /// failed send.
    pub async fn push_many<I, S>(&self, user_id: UserId, url_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for url_id in url_ids {
            self.push(DeleteJob::new(url_id, user_id)).await?;
        }
        Ok(())
    }

    /// Whether the worker has stopped accepting jobs.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
