//! Snapshot Store Implementation

use alert_core::AlertBookSnapshot;
use chrono::{DateTime, Utc};
use log_patterns::LogPattern;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use threshold_engine::{ThresholdChange, ThresholdConfig};
use tracing::{debug, info};

/// Persistence failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Everything the engine needs back after a restart: thresholds with
/// their audit trail, the alert book (active set, suppression windows,
/// day identities, history), and known log patterns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub saved_at: Option<DateTime<Utc>>,
    pub thresholds: Vec<ThresholdConfig>,
    pub threshold_history: Vec<ThresholdChange>,
    pub alert_book: AlertBookSnapshot,
    pub patterns: Vec<LogPattern>,
}

/// Atomic single-file JSON store
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot to a sibling temp file, then rename over the
    /// target so readers never observe a torn document.
    pub async fn save(&self, snapshot: &EngineSnapshot) -> Result<(), StorageError> {
        let payload = serde_json::to_vec_pretty(snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let temp = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp, &payload).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        debug!(
            "Persisted snapshot ({} thresholds, {} active alerts, {} patterns)",
            snapshot.thresholds.len(),
            snapshot.alert_book.active.len(),
            snapshot.patterns.len()
        );
        Ok(())
    }

    /// Load the snapshot, or `None` when no file exists yet
    pub async fn load(&self) -> Result<Option<EngineSnapshot>, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: EngineSnapshot = serde_json::from_slice(&bytes)?;
        info!(
            "Loaded snapshot from {} (saved at {:?})",
            self.path.display(),
            snapshot.saved_at
        );
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> SnapshotStore {
        let path = std::env::temp_dir().join(format!(
            "engine-snapshot-{}-{}.json",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        SnapshotStore::new(path)
    }

    #[tokio::test]
    async fn test_missing_file_loads_none() {
        let store = temp_store("missing");
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let store = temp_store("roundtrip");

        let snapshot = EngineSnapshot {
            saved_at: Some(Utc::now()),
            thresholds: vec![ThresholdConfig::new("cpu_percent", 80.0)],
            threshold_history: Vec::new(),
            alert_book: AlertBookSnapshot::default(),
            patterns: Vec::new(),
        };
        store.save(&snapshot).await.unwrap();

        let loaded = store.load().await.unwrap().expect("snapshot must exist");
        assert_eq!(loaded.thresholds.len(), 1);
        assert_eq!(loaded.thresholds[0].metric_name, "cpu_percent");
        assert_eq!(loaded.thresholds[0].base_threshold, 80.0);

        let _ = std::fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn test_save_replaces_previous_snapshot() {
        let store = temp_store("replace");

        let mut snapshot = EngineSnapshot::default();
        store.save(&snapshot).await.unwrap();

        snapshot.thresholds.push(ThresholdConfig::new("mem_percent", 90.0));
        store.save(&snapshot).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.thresholds.len(), 1);

        let _ = std::fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let store = temp_store("corrupt");
        tokio::fs::write(store.path(), b"not json").await.unwrap();

        assert!(matches!(
            store.load().await,
            Err(StorageError::Serde(_))
        ));

        let _ = std::fs::remove_file(store.path());
    }
}
