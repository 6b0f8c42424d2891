//! Per-Metric Ring Buffer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default samples retained per metric
pub const DEFAULT_CAPACITY: usize = 1000;

/// A single metric observation. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name
    pub name: String,
    /// Observed value
    pub value: f64,
    /// Observation time
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    /// Create a sample stamped with the current time
    pub fn now(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Bounded sample history for one metric (oldest evicted on overflow)
#[derive(Debug)]
pub struct SeriesBuffer {
    samples: VecDeque<MetricSample>,
    capacity: usize,
    /// Total samples ever pushed (survives eviction)
    total_appended: u64,
}

impl SeriesBuffer {
    /// Create a buffer with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
            total_appended: 0,
        }
    }

    /// Create a buffer with the default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Push a sample, evicting the oldest if the buffer is full
    pub fn push(&mut self, sample: MetricSample) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.total_appended += 1;
    }

    /// Number of samples currently held
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.samples.len() as f64 / self.capacity as f64
    }

    /// Total samples ever pushed
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    /// All retained values, oldest first
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    /// The last `count` samples, most recent first
    pub fn recent(&self, count: usize) -> Vec<MetricSample> {
        self.samples.iter().rev().take(count).cloned().collect()
    }

    /// Retained samples observed at or after the cutoff, oldest first
    pub fn since(&self, cutoff: DateTime<Utc>) -> Vec<MetricSample> {
        self.samples
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .cloned()
            .collect()
    }
}
