//! Chronos: the local history engine.
//!
//! Leaf to root: [`path_map`] locates a source's storage directory,
//! [`storage`] keeps the snapshot files, [`detector`] skips unchanged
//! content, [`retention`] prunes, [`diff`] renders comparisons and
//! [`service`] ties them together behind per-path locking. [`queue`] and
//! [`watcher`] are the background save front ends.

pub mod detector;
pub mod diff;
pub mod path_map;
pub mod queue;
pub mod retention;
pub mod service;
pub mod snapshot;
pub mod storage;
pub mod trigger;
pub mod watcher;

pub use retention::RetentionPolicy;
pub use service::{HistoryService, SaveOptions, SaveOutcome};
pub use snapshot::Snapshot;
pub use storage::SnapshotStore;
