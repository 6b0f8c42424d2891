//! Anomaly Detection
//!
//! Two independent signals per metric: a z-score check against recent
//! history and an isolation-forest model fitted lazily per metric.

mod detector;
mod forest;

pub use detector::{AnomalyDetector, AnomalyRecord, DetectionMethod, DetectorConfig};
pub use forest::IsolationForest;
