//! Engine Wiring

use crate::settings::EngineSettings;
use alert_core::{Alert, AlertEngine, AlertError, EscalationCallback, Severity, ThresholdSource};
use anomaly_detect::{AnomalyDetector, AnomalyRecord};
use chrono::{DateTime, Utc};
use escalation::EscalationScheduler;
use log_patterns::{LogAnalysis, LogEntry, LogLevel, LogPattern, PatternMiner};
use metric_store::MetricStore;
use notifier::{DispatchRecord, NotificationDispatcher};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use storage::{EngineSnapshot, SnapshotStore, StorageError};
use threshold_engine::{ThresholdConfig, ThresholdError, ThresholdManager};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Anomaly records kept for operator introspection
const ANOMALY_BUFFER: usize = 512;

/// Threshold lookups for rule evaluation
struct ThresholdView(Arc<ThresholdManager>);

impl ThresholdSource for ThresholdView {
    fn threshold(&self, name: &str) -> Option<f64> {
        self.0.threshold(name)
    }
}

/// Handles to the engine's background loops
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Signal shutdown and wait for the loops to drain
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// The assembled monitoring engine
pub struct MonitoringEngine {
    settings: EngineSettings,
    store: Arc<MetricStore>,
    thresholds: Arc<ThresholdManager>,
    detector: Arc<AnomalyDetector>,
    miner: Arc<PatternMiner>,
    alerts: Arc<AlertEngine>,
    dispatcher: Arc<NotificationDispatcher>,
    snapshots: Option<SnapshotStore>,
    recent_anomalies: Mutex<VecDeque<AnomalyRecord>>,
    log_tx: mpsc::Sender<Vec<LogEntry>>,
    log_rx: Mutex<Option<mpsc::Receiver<Vec<LogEntry>>>>,
}

impl MonitoringEngine {
    pub fn new(settings: EngineSettings) -> Self {
        let store = Arc::new(MetricStore::new(settings.metric_capacity));
        let thresholds = Arc::new(
            ThresholdManager::new(Arc::clone(&store)).with_recompute_interval(
                chrono::Duration::seconds(settings.recompute_interval_secs),
            ),
        );
        let detector = Arc::new(AnomalyDetector::new(
            Arc::clone(&store),
            settings.detector.clone(),
        ));
        let miner = Arc::new(PatternMiner::new(settings.miner.clone()));
        let alerts = Arc::new(AlertEngine::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(&settings.notifications));
        let snapshots = settings.snapshot_path.as_ref().map(SnapshotStore::new);
        let (log_tx, log_rx) = mpsc::channel(settings.log_queue_depth);

        info!("Monitoring engine assembled");
        Self {
            settings,
            store,
            thresholds,
            detector,
            miner,
            alerts,
            dispatcher,
            snapshots,
            recent_anomalies: Mutex::new(VecDeque::with_capacity(ANOMALY_BUFFER)),
            log_tx,
            log_rx: Mutex::new(Some(log_rx)),
        }
    }

    // ---- producer surface ----

    /// Append one metric sample; never blocks beyond the buffer append.
    /// Threshold recompute is throttled internally.
    pub fn ingest_metric(&self, name: &str, value: f64, timestamp: DateTime<Utc>) {
        self.thresholds.ingest(name, value, timestamp);
    }

    /// Primary tick entry point: run anomaly detection, evaluate rules,
    /// dispatch newly created alerts. Returns the new alerts only.
    pub async fn evaluate_metrics(&self, snapshot: &HashMap<String, f64>) -> Vec<Alert> {
        let anomalies = self.detector.detect(snapshot);
        if !anomalies.is_empty() {
            let mut recent = lock(&self.recent_anomalies);
            for record in &anomalies {
                while recent.len() >= ANOMALY_BUFFER {
                    recent.pop_front();
                }
                recent.push_back(record.clone());
            }
        }

        let view = ThresholdView(Arc::clone(&self.thresholds));
        let created = self.alerts.evaluate(snapshot, &view);

        for alert in &created {
            let records = self.dispatcher.dispatch(alert, &alert.channels).await;
            if !records.is_empty() {
                self.alerts
                    .record_notifications(alert.id, records.len() as u32);
            }
        }

        // Degraded persistence never blocks alerting.
        if let Err(e) = self.persist().await {
            warn!("Snapshot write failed, in-memory state stays authoritative: {}", e);
        }

        created
    }

    /// Batch log analysis: patterns, error-rate anomalies, and
    /// remediation recommendations
    pub fn analyze_logs(
        &self,
        entries: &[LogEntry],
        range: (DateTime<Utc>, DateTime<Utc>),
        levels: &[LogLevel],
    ) -> LogAnalysis {
        self.miner.analyze(entries, range, levels)
    }

    /// Queue a log batch for the background mining loop. Returns false
    /// when the engine is shutting down.
    pub async fn queue_logs(&self, batch: Vec<LogEntry>) -> bool {
        self.log_tx.send(batch).await.is_ok()
    }

    // ---- operator surface ----

    pub fn register_threshold(&self, config: ThresholdConfig) -> Result<(), ThresholdError> {
        self.thresholds.register(config)
    }

    pub fn register_rule(&self, rule: alert_core::AlertRule) -> Result<(), AlertError> {
        self.alerts.register_rule(rule)
    }

    pub fn enable_rule(&self, rule_id: &str) -> Result<(), AlertError> {
        self.alerts.set_rule_enabled(rule_id, true)
    }

    pub fn disable_rule(&self, rule_id: &str) -> Result<(), AlertError> {
        self.alerts.set_rule_enabled(rule_id, false)
    }

    pub fn acknowledge_alert(&self, id: Uuid) -> Result<Alert, AlertError> {
        self.alerts.acknowledge(id)
    }

    pub fn resolve_alert(&self, id: Uuid) -> Result<Alert, AlertError> {
        self.alerts.resolve(id)
    }

    pub fn get_active_alerts(&self, severity_floor: Option<Severity>) -> Vec<Alert> {
        self.alerts.get_active(severity_floor)
    }

    pub fn register_escalation_callback(&self, name: &str, callback: EscalationCallback) {
        self.alerts.register_callback(name, callback);
    }

    /// Current adaptive threshold for a metric
    pub fn threshold(&self, name: &str) -> Option<f64> {
        self.thresholds.threshold(name)
    }

    /// Known log patterns, most frequent first
    pub fn patterns(&self) -> Vec<LogPattern> {
        self.miner.patterns()
    }

    /// Recently detected anomalies, oldest first
    pub fn recent_anomalies(&self) -> Vec<AnomalyRecord> {
        lock(&self.recent_anomalies).iter().cloned().collect()
    }

    /// Notification attempts, oldest first
    pub fn dispatch_history(&self) -> Vec<DispatchRecord> {
        self.dispatcher.history()
    }

    /// Underlying alert engine (lifecycle introspection)
    pub fn alert_engine(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    /// Underlying metric store (buffer introspection)
    pub fn metric_store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    // ---- lifecycle ----

    /// Spawn the escalation scheduler and the log mining loop
    pub fn start_background(self: &Arc<Self>) -> BackgroundTasks {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        let scheduler = EscalationScheduler::new(
            Arc::clone(&self.alerts),
            Arc::clone(&self.dispatcher),
            self.settings.scheduler.clone(),
        );
        handles.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));

        if let Some(mut rx) = lock(&self.log_rx).take() {
            let miner = Arc::clone(&self.miner);
            let mut shutdown = shutdown_rx;
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        batch = rx.recv() => match batch {
                            Some(batch) => {
                                let touched = miner.mine(&batch);
                                debug!(
                                    "Mined queued batch of {}: {} patterns touched",
                                    batch.len(),
                                    touched.len()
                                );
                            }
                            None => break,
                        },
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
                info!("Log mining loop stopped");
            }));
        }

        BackgroundTasks {
            shutdown: shutdown_tx,
            handles,
        }
    }

    /// Persist a snapshot if a store is configured
    pub async fn persist(&self) -> Result<(), StorageError> {
        let Some(store) = &self.snapshots else {
            return Ok(());
        };

        let snapshot = EngineSnapshot {
            saved_at: Some(Utc::now()),
            thresholds: self.thresholds.configs(),
            threshold_history: self.thresholds.history(),
            alert_book: self.alerts.snapshot(),
            patterns: self.miner.patterns(),
        };
        store.save(&snapshot).await
    }

    /// Restore persisted state. Returns whether a snapshot was found.
    pub async fn restore(&self) -> Result<bool, StorageError> {
        let Some(store) = &self.snapshots else {
            return Ok(false);
        };
        let Some(snapshot) = store.load().await? else {
            return Ok(false);
        };

        for config in snapshot.thresholds {
            self.thresholds.restore(config);
        }
        self.thresholds.restore_history(snapshot.threshold_history);
        self.alerts.restore(snapshot.alert_book);
        for pattern in snapshot.patterns {
            self.miner.restore(pattern);
        }

        info!("Engine state restored from snapshot");
        Ok(true)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MonitoringEngine {
        MonitoringEngine::new(EngineSettings::default())
    }

    #[tokio::test]
    async fn test_evaluate_without_rules_creates_nothing() {
        let engine = engine();
        let snapshot = HashMap::from([("cpu_percent".to_string(), 95.0)]);
        assert!(engine.evaluate_metrics(&snapshot).await.is_empty());
    }

    #[tokio::test]
    async fn test_evaluation_feeds_metric_history() {
        let engine = engine();
        let snapshot = HashMap::from([("cpu_percent".to_string(), 50.0)]);

        for _ in 0..3 {
            engine.evaluate_metrics(&snapshot).await;
        }
        assert_eq!(engine.metric_store().len("cpu_percent"), 3);
    }

    #[test]
    fn test_ingest_metric_appends() {
        let engine = engine();
        engine.ingest_metric("queue_depth", 12.0, Utc::now());
        engine.ingest_metric("queue_depth", 14.0, Utc::now());
        assert_eq!(engine.metric_store().values("queue_depth"), vec![12.0, 14.0]);
    }

    #[tokio::test]
    async fn test_anomaly_buffer_fills_on_outliers() {
        let engine = engine();

        let calm = HashMap::from([("latency_ms".to_string(), 10.0)]);
        for i in 0..40 {
            let mut snapshot = calm.clone();
            snapshot.insert("latency_ms".to_string(), 10.0 + (i % 5) as f64);
            engine.evaluate_metrics(&snapshot).await;
        }

        let spike = HashMap::from([("latency_ms".to_string(), 10_000.0)]);
        engine.evaluate_metrics(&spike).await;

        assert!(!engine.recent_anomalies().is_empty());
    }

    #[tokio::test]
    async fn test_background_tasks_shut_down_cleanly() {
        let engine = Arc::new(engine());
        let tasks = engine.start_background();

        assert!(engine.queue_logs(vec![LogEntry::now(LogLevel::Error, "api", "boom")]).await);
        tasks.shutdown().await;
    }
}
