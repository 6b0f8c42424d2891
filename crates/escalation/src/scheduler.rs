//! Scheduler Implementation

use alert_core::AlertEngine;
use chrono::Utc;
use notifier::NotificationDispatcher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Configuration for the escalation scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between escalation passes (default: 60)
    pub tick_secs: u64,
    /// Hours after which an unresolved ACTIVE alert is force-resolved
    /// (default: 24)
    pub auto_resolve_hours: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            auto_resolve_hours: 24,
        }
    }
}

/// Background loop advancing alert escalation
pub struct EscalationScheduler {
    engine: Arc<AlertEngine>,
    dispatcher: Arc<NotificationDispatcher>,
    config: SchedulerConfig,
}

impl EscalationScheduler {
    pub fn new(
        engine: Arc<AlertEngine>,
        dispatcher: Arc<NotificationDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        info!(
            "Creating escalation scheduler (tick {}s, auto-resolve {}h)",
            config.tick_secs, config.auto_resolve_hours
        );
        Self {
            engine,
            dispatcher,
            config,
        }
    }

    /// Run until the shutdown signal flips. In-flight dispatch for the
    /// current tick completes before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.tick_secs));
        info!("Escalation scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Escalation scheduler stopped");
    }

    /// One escalation pass plus re-notification of escalated alerts
    async fn run_tick(&self) {
        let outcome = self.engine.escalation_pass(
            Utc::now(),
            chrono::Duration::hours(self.config.auto_resolve_hours),
        );

        if !outcome.auto_resolved.is_empty() {
            warn!("{} stale alerts force-resolved", outcome.auto_resolved.len());
        }

        for alert in &outcome.escalated {
            let records = self.dispatcher.dispatch(alert, &alert.channels).await;
            if !records.is_empty() {
                self.engine
                    .record_notifications(alert.id, records.len() as u32);
            }
            debug!(
                "Re-notified alert {} at escalation level {}",
                alert.id, alert.escalation_level
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_core::{AlertRule, CmpOp, Condition, EscalationAction, EscalationStep, Severity};
    use notifier::NotificationSettings;
    use std::collections::HashMap;

    fn engine_with_active_alert(ladder: Vec<EscalationStep>) -> Arc<AlertEngine> {
        let engine = Arc::new(AlertEngine::new());
        engine
            .register_rule(
                AlertRule::new(
                    "high_cpu",
                    "High CPU",
                    Condition::metric("cpu_percent", CmpOp::Gt, 80.0),
                    Severity::High,
                )
                .with_ladder(ladder),
            )
            .unwrap();

        let metrics = HashMap::from([("cpu_percent".to_string(), 95.0)]);
        let thresholds: HashMap<String, f64> = HashMap::new();
        let created = engine.evaluate(&metrics, &thresholds);
        assert_eq!(created.len(), 1);
        engine
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_escalates_due_alerts() {
        let engine = engine_with_active_alert(vec![EscalationStep {
            after_secs: 0,
            actions: vec![EscalationAction::RaiseSeverity(Severity::Critical)],
        }]);
        let dispatcher = Arc::new(NotificationDispatcher::new(&NotificationSettings::default()));

        let scheduler = EscalationScheduler::new(
            Arc::clone(&engine),
            dispatcher,
            SchedulerConfig {
                tick_secs: 1,
                auto_resolve_hours: 24,
            },
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(rx));

        // Let the first tick run.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let active = engine.get_active(None);
        assert_eq!(active[0].escalation_level, 1);
        assert_eq!(active[0].severity, Severity::Critical);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_the_loop() {
        let engine = Arc::new(AlertEngine::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(&NotificationSettings::default()));
        let scheduler =
            EscalationScheduler::new(engine, dispatcher, SchedulerConfig::default());

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(rx));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_stops_the_loop() {
        let engine = Arc::new(AlertEngine::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(&NotificationSettings::default()));
        let scheduler =
            EscalationScheduler::new(engine, dispatcher, SchedulerConfig::default());

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(rx));
        drop(tx);
        handle.await.unwrap();
    }
}
