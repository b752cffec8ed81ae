//! Offline cache and replay queue for Analog Society clients.
//!
//! A local SQLite store mirrors the member's inventory and keeps arbitrary
//! user data by key. Mutations that could not reach the server are queued
//! and replayed in insertion order by `drain` once the network is back.

mod error;
mod queue;
mod replay;
mod store;

pub use error::SyncError;
pub use queue::{DrainReport, PendingAction, QueuedAction, Submission, drain, submit_or_queue};
pub use replay::{HttpReplayer, Replayer};
pub use store::{CachedItem, LocalExport, OfflineStore, STORE_VERSION};
