//! Anomaly Detector Implementation

use crate::forest::IsolationForest;
use chrono::{DateTime, Utc};
use metric_store::{MetricSample, MetricStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Which signal produced an anomaly record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Statistical,
    Model,
}

/// A flagged metric value. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub timestamp: DateTime<Utc>,
    pub method: DetectionMethod,
    /// Severity in [0, 1]
    pub severity: f64,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub metric: String,
    pub explanation: String,
    pub details: serde_json::Value,
}

/// Detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// z-score above which the statistical check fires (default: 3.0)
    pub z_threshold: f64,
    /// Minimum history for the statistical check (default: 10)
    pub min_statistical_samples: usize,
    /// Minimum history before a model is fitted (default: 30)
    pub min_model_samples: usize,
    /// Normalized forest score above which a value is an outlier (default: 0.6)
    pub outlier_score: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            z_threshold: 3.0,
            min_statistical_samples: 10,
            min_model_samples: 30,
            outlier_score: 0.6,
        }
    }
}

/// Anomaly detector over the shared metric store.
///
/// Models are fitted once per metric on first sufficiency and cached;
/// `retrain` drops the cached model so the next tick refits.
pub struct AnomalyDetector {
    store: Arc<MetricStore>,
    config: DetectorConfig,
    models: Mutex<HashMap<String, IsolationForest>>,
}

impl AnomalyDetector {
    /// Create a detector reading from the given store
    pub fn new(store: Arc<MetricStore>, config: DetectorConfig) -> Self {
        info!("Creating anomaly detector with config: {:?}", config);
        Self {
            store,
            config,
            models: Mutex::new(HashMap::new()),
        }
    }

    /// Run both checks for every metric in the snapshot.
    ///
    /// History is read strictly prior to the current sample; the current
    /// value is appended only after both checks ran. A metric can yield
    /// zero, one, or two records per tick.
    pub fn detect(&self, current: &HashMap<String, f64>) -> Vec<AnomalyRecord> {
        let now = Utc::now();
        let mut records = Vec::new();

        for (name, &value) in current {
            let history = self.store.values(name);

            if let Some(record) = self.statistical_check(name, value, &history, now) {
                records.push(record);
            }
            if let Some(record) = self.model_check(name, value, &history, now) {
                records.push(record);
            }

            self.store.append(MetricSample {
                name: name.clone(),
                value,
                timestamp: now,
            });
        }

        if !records.is_empty() {
            debug!("Detected {} anomalies this tick", records.len());
        }
        records
    }

    fn statistical_check(
        &self,
        name: &str,
        value: f64,
        history: &[f64],
        now: DateTime<Utc>,
    ) -> Option<AnomalyRecord> {
        if history.len() < self.config.min_statistical_samples {
            return None;
        }

        let n = history.len() as f64;
        let mean = history.iter().sum::<f64>() / n;
        let variance = history.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let stddev = variance.sqrt();

        // Constant series never fire; z is undefined at zero spread.
        if stddev <= 0.0 {
            return None;
        }

        let z = (value - mean).abs() / stddev;
        if z <= self.config.z_threshold {
            return None;
        }

        let severity = (z / self.config.z_threshold).min(1.0);
        debug!("Statistical anomaly on {}: z={:.2}", name, z);

        Some(AnomalyRecord {
            timestamp: now,
            method: DetectionMethod::Statistical,
            severity,
            // More history behind the estimate means more trust in it.
            confidence: (n / 100.0).min(1.0),
            metric: name.to_string(),
            explanation: format!(
                "value {:.3} deviates {:.1} standard deviations from mean {:.3}",
                value, z, mean
            ),
            details: serde_json::json!({
                "z_score": z,
                "mean": mean,
                "stddev": stddev,
                "samples": history.len(),
            }),
        })
    }

    fn model_check(
        &self,
        name: &str,
        value: f64,
        history: &[f64],
        now: DateTime<Utc>,
    ) -> Option<AnomalyRecord> {
        if history.len() < self.config.min_model_samples {
            return None;
        }

        let score = {
            let mut models = self
                .models
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            models
                .entry(name.to_string())
                .or_insert_with(|| {
                    debug!("Fitting isolation forest for {} ({} samples)", name, history.len());
                    IsolationForest::fit(name, history)
                })
                .score(value)
        };

        if score <= self.config.outlier_score {
            return None;
        }

        let severity =
            ((score - self.config.outlier_score) / (1.0 - self.config.outlier_score)).clamp(0.0, 1.0);

        Some(AnomalyRecord {
            timestamp: now,
            method: DetectionMethod::Model,
            severity,
            // Distance from the decision midpoint, rescaled to [0, 1].
            confidence: ((score - 0.5).abs() * 2.0).clamp(0.0, 1.0),
            metric: name.to_string(),
            explanation: format!(
                "value {:.3} isolated with anomaly score {:.3}",
                value, score
            ),
            details: serde_json::json!({
                "anomaly_score": score,
                "outlier_threshold": self.config.outlier_score,
                "samples": history.len(),
            }),
        })
    }

    /// Drop the cached model for a metric so the next tick refits
    pub fn retrain(&self, name: &str) {
        let mut models = self
            .models
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if models.remove(name).is_some() {
            info!("Dropped model for {}; will refit on next detection", name);
        }
    }

    /// Number of fitted per-metric models
    pub fn model_count(&self) -> usize {
        self.models
            .lock()
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector_with_history(name: &str, values: &[f64]) -> AnomalyDetector {
        let store = Arc::new(MetricStore::default());
        for &v in values {
            store.append(MetricSample::now(name, v));
        }
        AnomalyDetector::new(store, DetectorConfig::default())
    }

    fn snapshot(name: &str, value: f64) -> HashMap<String, f64> {
        HashMap::from([(name.to_string(), value)])
    }

    #[test]
    fn test_constant_history_never_fires_statistical() {
        let detector = detector_with_history("queue_depth", &[10.0; 50]);

        let records = detector.detect(&snapshot("queue_depth", 10.0));
        assert!(records
            .iter()
            .all(|r| r.method != DetectionMethod::Statistical));
    }

    #[test]
    fn test_z_score_severity_saturates() {
        // mean 50, stddev 5 over an alternating series
        let history: Vec<f64> = (0..50).map(|i| if i % 2 == 0 { 45.0 } else { 55.0 }).collect();
        let detector = detector_with_history("cpu_percent", &history);

        let records = detector.detect(&snapshot("cpu_percent", 90.0));
        let stat = records
            .iter()
            .find(|r| r.method == DetectionMethod::Statistical)
            .expect("z=8 must fire the statistical check");

        assert_eq!(stat.severity, 1.0);
        assert_eq!(stat.details["z_score"].as_f64().unwrap().round(), 8.0);
    }

    #[test]
    fn test_too_little_history_is_silent() {
        let detector = detector_with_history("cpu_percent", &[50.0, 51.0, 49.0]);

        let records = detector.detect(&snapshot("cpu_percent", 500.0));
        assert!(records.is_empty());
    }

    #[test]
    fn test_model_fires_on_far_outlier() {
        let history: Vec<f64> = (0..100).map(|i| 50.0 + i as f64 * 0.07).collect();
        let detector = detector_with_history("latency_ms", &history);

        let records = detector.detect(&snapshot("latency_ms", 5000.0));
        assert!(records
            .iter()
            .any(|r| r.method == DetectionMethod::Model && r.severity > 0.0));
    }

    #[test]
    fn test_detection_appends_current_value() {
        let detector = detector_with_history("cpu_percent", &[1.0, 2.0]);
        detector.detect(&snapshot("cpu_percent", 3.0));

        assert_eq!(detector.store.values("cpu_percent"), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_retrain_drops_model() {
        let history: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let detector = detector_with_history("io_wait", &history);

        detector.detect(&snapshot("io_wait", 20.0));
        assert_eq!(detector.model_count(), 1);

        detector.retrain("io_wait");
        assert_eq!(detector.model_count(), 0);
    }
}
