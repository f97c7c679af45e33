//! Asynchronous deletion pipeline.
//!
//! Producers push `(user, url id)` jobs into a bounded queue. A single
//! worker task groups them per user and issues one
//! [`Storage::delete_many`](snip_core::Storage::delete_many) per user on
//! every flush tick, and once more while shutting down.

mod config;
mod error;
mod queue;
mod worker;

pub use config::{DeleterConfig, DEFAULT_FLUSH_INTERVAL, DEFAULT_QUEUE_CAPACITY};
pub use error::{DeleterError, Result};
pub use queue::{DeleteJob, DeleteQueue};
pub use worker::{spawn, WorkerHandle, WorkerState};
