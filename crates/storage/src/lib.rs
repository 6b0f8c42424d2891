//! Snapshot Persistence
//!
//! Durable engine state as one JSON document, written atomically.
//! In-memory state stays authoritative; a failed write is logged and
//! retried on the next persist.

mod snapshot;

pub use snapshot::{EngineSnapshot, SnapshotStore, StorageError};
