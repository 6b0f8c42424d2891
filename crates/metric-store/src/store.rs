//! Concurrent Metric Store

use crate::series::{MetricSample, SeriesBuffer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// Snapshot of one series' buffer state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesStats {
    pub name: String,
    pub len: usize,
    pub capacity: usize,
    pub fill_ratio: f64,
    pub total_appended: u64,
}

/// Store of per-metric history buffers.
///
/// The outer map is read-locked on the hot path; each series has its own
/// mutex so producers for different metrics never contend. Appends take
/// the write lock only when a metric is seen for the first time.
pub struct MetricStore {
    series: RwLock<HashMap<String, Arc<Mutex<SeriesBuffer>>>>,
    capacity: usize,
}

impl MetricStore {
    /// Create a store whose series hold `capacity` samples each
    pub fn new(capacity: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    fn lock_series(buffer: &Mutex<SeriesBuffer>) -> MutexGuard<'_, SeriesBuffer> {
        // A poisoned series still holds valid samples; recover the guard.
        buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entry(&self, name: &str) -> Arc<Mutex<SeriesBuffer>> {
        if let Ok(map) = self.series.read() {
            if let Some(buffer) = map.get(name) {
                return Arc::clone(buffer);
            }
        }
        let mut map = self
            .series
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SeriesBuffer::new(self.capacity)))),
        )
    }

    fn find(&self, name: &str) -> Option<Arc<Mutex<SeriesBuffer>>> {
        self.series
            .read()
            .ok()
            .and_then(|map| map.get(name).map(Arc::clone))
    }

    /// Append a sample to its metric's buffer
    pub fn append(&self, sample: MetricSample) {
        let buffer = self.entry(&sample.name);
        Self::lock_series(&buffer).push(sample);
    }

    /// Retained values for a metric, oldest first
    pub fn values(&self, name: &str) -> Vec<f64> {
        match self.find(name) {
            Some(buffer) => Self::lock_series(&buffer).values(),
            None => Vec::new(),
        }
    }

    /// The last `count` samples for a metric, most recent first
    pub fn recent(&self, name: &str, count: usize) -> Vec<MetricSample> {
        match self.find(name) {
            Some(buffer) => Self::lock_series(&buffer).recent(count),
            None => Vec::new(),
        }
    }

    /// Number of retained samples for a metric
    pub fn len(&self, name: &str) -> usize {
        match self.find(name) {
            Some(buffer) => Self::lock_series(&buffer).len(),
            None => 0,
        }
    }

    /// Whether the store holds no series at all
    pub fn is_empty(&self) -> bool {
        self.series.read().map(|m| m.is_empty()).unwrap_or(true)
    }

    /// Names of all tracked metrics
    pub fn names(&self) -> Vec<String> {
        self.series
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Per-series buffer statistics
    pub fn stats(&self) -> Vec<SeriesStats> {
        let map = match self.series.read() {
            Ok(map) => map,
            Err(_) => return Vec::new(),
        };
        map.iter()
            .map(|(name, buffer)| {
                let guard = Self::lock_series(buffer);
                SeriesStats {
                    name: name.clone(),
                    len: guard.len(),
                    capacity: guard.capacity(),
                    fill_ratio: guard.fill_ratio(),
                    total_appended: guard.total_appended(),
                }
            })
            .collect()
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new(crate::series::DEFAULT_CAPACITY)
    }
}
