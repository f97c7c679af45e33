//! Core types and traits for the Snip URL shortener.
//!
//! This crate provides the link [`Record`], the storage contract shared by
//! every backend and the storage error taxonomy. Transport adapters and the
//! deletion pipeline depend on these types only, never on a concrete backend.

pub mod error;
pub mod record;
pub mod storage;

pub use error::{Result, StorageError};
pub use record::{Record, Stats, UserId};
pub use storage::{ReadStorage, Storage};
