//! End-to-end engine scenarios

use chrono::{Duration, Utc};
use monitor::{
    AlertRule, ChannelKind, CmpOp, Condition, EngineSettings, EscalationAction, EscalationStep,
    LogEntry, LogLevel, MonitoringEngine, Severity, ThresholdConfig,
};
use std::collections::HashMap;
use std::sync::Arc;

fn cpu_snapshot(value: f64) -> HashMap<String, f64> {
    HashMap::from([("cpu_percent".to_string(), value)])
}

fn high_cpu_rule() -> AlertRule {
    AlertRule::new(
        "high_cpu",
        "High CPU",
        Condition::metric("cpu_percent", CmpOp::Gt, 80.0),
        Severity::High,
    )
    .with_suppression_window(300)
}

#[tokio::test]
async fn suppression_and_day_identity_interact_as_documented() {
    let engine = MonitoringEngine::new(EngineSettings::default());
    engine.register_rule(high_cpu_rule()).unwrap();

    // t=0: the rule fires once.
    let created = engine.evaluate_metrics(&cpu_snapshot(85.0)).await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].severity, Severity::High);

    // t=100: still inside the suppression window.
    assert!(engine.evaluate_metrics(&cpu_snapshot(92.0)).await.is_empty());

    // t=310: window elapsed, but the day-scoped identity still blocks.
    let mut snapshot = engine.alert_engine().snapshot();
    snapshot
        .suppressed_until
        .insert("high_cpu".to_string(), Utc::now() - Duration::seconds(10));
    engine.alert_engine().restore(snapshot);

    assert!(engine.evaluate_metrics(&cpu_snapshot(95.0)).await.is_empty());
    assert_eq!(engine.get_active_alerts(None).len(), 1);
}

#[tokio::test]
async fn rules_fire_against_adaptive_thresholds() {
    let engine = MonitoringEngine::new(EngineSettings::default());
    engine
        .register_threshold(ThresholdConfig::new("cpu_percent", 80.0))
        .unwrap();
    engine
        .register_rule(AlertRule::new(
            "cpu_over_threshold",
            "CPU over adaptive threshold",
            Condition::metric_over_threshold("cpu_percent"),
            Severity::Medium,
        ))
        .unwrap();

    // 75 sits below the registered threshold of 80; 85 crosses it.
    assert!(engine.evaluate_metrics(&cpu_snapshot(75.0)).await.is_empty());
    let created = engine.evaluate_metrics(&cpu_snapshot(85.0)).await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].rule_id, "cpu_over_threshold");
}

#[tokio::test]
async fn acknowledge_and_resolve_lifecycle() {
    let engine = MonitoringEngine::new(EngineSettings::default());
    engine.register_rule(high_cpu_rule()).unwrap();

    let id = engine.evaluate_metrics(&cpu_snapshot(90.0)).await[0].id;

    let acked = engine.acknowledge_alert(id).unwrap();
    assert!(acked.acknowledged_at.is_some());

    // Acknowledged alerts are excluded from escalation.
    let outcome = engine
        .alert_engine()
        .escalation_pass(Utc::now() + Duration::hours(2), Duration::hours(24));
    assert!(outcome.escalated.is_empty());

    engine.resolve_alert(id).unwrap();
    assert!(engine.get_active_alerts(None).is_empty());
}

#[tokio::test]
async fn escalation_raises_severity_and_adds_channels() {
    let engine = MonitoringEngine::new(EngineSettings::default());
    engine
        .register_rule(high_cpu_rule().with_ladder(vec![EscalationStep {
            after_secs: 600,
            actions: vec![
                EscalationAction::RaiseSeverity(Severity::Critical),
                EscalationAction::AddChannel(ChannelKind::Desktop),
                EscalationAction::AssignOwner("oncall".to_string()),
            ],
        }]))
        .unwrap();

    let created_at = engine.evaluate_metrics(&cpu_snapshot(90.0)).await[0].created_at;

    let outcome = engine
        .alert_engine()
        .escalation_pass(created_at + Duration::seconds(601), Duration::hours(24));
    assert_eq!(outcome.escalated.len(), 1);

    let active = &engine.get_active_alerts(None)[0];
    assert_eq!(active.escalation_level, 1);
    assert_eq!(active.severity, Severity::Critical);
    assert!(active.channels.contains(&ChannelKind::Desktop));
    assert_eq!(active.owner.as_deref(), Some("oncall"));
}

#[tokio::test]
async fn state_survives_a_restart() {
    let path = std::env::temp_dir().join(format!("monitor-restart-{}.json", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let settings = EngineSettings {
        snapshot_path: Some(path.display().to_string()),
        ..Default::default()
    };

    {
        let engine = MonitoringEngine::new(settings.clone());
        engine
            .register_threshold(ThresholdConfig::new("cpu_percent", 80.0))
            .unwrap();
        engine.register_rule(high_cpu_rule()).unwrap();

        let created = engine.evaluate_metrics(&cpu_snapshot(90.0)).await;
        assert_eq!(created.len(), 1);
        engine.persist().await.unwrap();
    }

    // Fresh process: rules are re-registered, lifecycle state reloads.
    let engine = MonitoringEngine::new(settings);
    engine.register_rule(high_cpu_rule()).unwrap();
    assert!(engine.restore().await.unwrap());

    assert_eq!(engine.get_active_alerts(None).len(), 1);
    assert_eq!(engine.threshold("cpu_percent"), Some(80.0));
    // The restored suppression window and day identity still gate the rule.
    assert!(engine.evaluate_metrics(&cpu_snapshot(95.0)).await.is_empty());

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn log_analysis_returns_patterns_and_recommendations() {
    let engine = MonitoringEngine::new(EngineSettings::default());
    let now = Utc::now();

    let entries: Vec<LogEntry> = (0..4)
        .map(|i| LogEntry {
            timestamp: now - Duration::minutes(5),
            level: LogLevel::Error,
            source: "worker".to_string(),
            message: format!("request {} timed out", i),
        })
        .collect();

    let analysis = engine.analyze_logs(&entries, (now - Duration::hours(1), now), &[]);

    let timeout = analysis
        .patterns
        .iter()
        .find(|p| p.pattern_id == "timeout")
        .expect("timeout pattern must be mined");
    assert_eq!(timeout.frequency, 4);
    assert!(!analysis.recommendations.is_empty());

    // The pattern store is shared with the background miner surface.
    assert!(engine.patterns().iter().any(|p| p.pattern_id == "timeout"));
}

#[tokio::test]
async fn background_mining_loop_consumes_queued_batches() {
    let engine = Arc::new(MonitoringEngine::new(EngineSettings::default()));
    let tasks = engine.start_background();

    let batch: Vec<LogEntry> = (0..3)
        .map(|i| LogEntry::now(LogLevel::Error, "db", &format!("deadlock on table t{}", i)))
        .collect();
    assert!(engine.queue_logs(batch).await);

    // Give the loop a moment to drain the queue.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    tasks.shutdown().await;

    assert!(engine
        .patterns()
        .iter()
        .any(|p| p.pattern_id == "database_error"));
}
