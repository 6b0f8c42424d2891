//! Monitoring Engine Facade
//!
//! Wires the metric store, threshold manager, anomaly detector,
//! pattern miner, alert engine, escalation scheduler, and notification
//! dispatcher into one producer- and operator-facing surface.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod engine;
mod settings;

pub use engine::{BackgroundTasks, MonitoringEngine};
pub use settings::EngineSettings;

// The full subsystem vocabulary, re-exported for embedders.
pub use alert_core::{
    Alert, AlertRule, AlertStatus, ChannelKind, CmpOp, Condition, EscalationAction,
    EscalationStep, Operand, Severity,
};
pub use anomaly_detect::{AnomalyRecord, DetectionMethod};
pub use log_patterns::{LogAnalysis, LogEntry, LogLevel, LogPattern};
pub use threshold_engine::ThresholdConfig;

/// Initialize structured logging
pub fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}
