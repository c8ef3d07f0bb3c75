//! Local artifact storage with a disk ceiling and LRU eviction.
//!
//! All finished artifacts live flat under one downloads root, with per-job
//! scratch directories underneath it. The [`StorageManager`] is the single
//! writer for both the accounting table and the directory tree, so usage
//! never drifts from what is actually on disk.

pub mod error;
pub mod manager;

pub use error::{StorageError, StorageResult};
pub use manager::{StorageEntry, StorageManager};
