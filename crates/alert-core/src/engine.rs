//! Alert Engine Implementation
//!
//! All lifecycle state lives behind one mutex (the "book"): concurrent
//! evaluation and escalation ticks serialize there and never race on an
//! alert.

use crate::alert::{Alert, AlertStatus, Severity};
use crate::condition::ThresholdSource;
use crate::rule::{AlertRule, EscalationAction};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Historical alert retention
const HISTORY_CAP: usize = 10_000;

/// Alert engine failures
#[derive(Debug, Clone, Error)]
pub enum AlertError {
    #[error("invalid rule {rule_id}: {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("rule not registered: {0}")]
    UnknownRule(String),

    #[error("alert not found: {0}")]
    UnknownAlert(Uuid),

    #[error("alert {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: Uuid,
        from: AlertStatus,
        to: AlertStatus,
    },
}

/// Callback invoked by an escalation ladder action
pub type EscalationCallback = Arc<dyn Fn(&Alert) + Send + Sync>;

/// What one escalation pass did
#[derive(Debug, Default)]
pub struct EscalationOutcome {
    /// Alerts whose level advanced this pass (re-notify these)
    pub escalated: Vec<Alert>,
    /// Alerts force-resolved by the age horizon
    pub auto_resolved: Vec<Alert>,
}

/// Persistable lifecycle state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertBookSnapshot {
    pub active: Vec<Alert>,
    /// Day-scoped identity keys that already fired
    pub identities: Vec<String>,
    /// Rule-id to suppression deadline
    pub suppressed_until: HashMap<String, DateTime<Utc>>,
    pub history: Vec<Alert>,
}

#[derive(Default)]
struct AlertBook {
    active: HashMap<Uuid, Alert>,
    identities: HashSet<String>,
    suppressed_until: HashMap<String, DateTime<Utc>>,
    history: VecDeque<Alert>,
}

impl AlertBook {
    fn push_history(&mut self, alert: Alert) {
        while self.history.len() >= HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(alert);
    }
}

fn identity_key(rule_id: &str, day: NaiveDate) -> String {
    format!("{}:{}", rule_id, day)
}

/// Rule evaluation and alert lifecycle owner
pub struct AlertEngine {
    rules: RwLock<HashMap<String, AlertRule>>,
    book: Mutex<AlertBook>,
    callbacks: RwLock<HashMap<String, EscalationCallback>>,
}

impl AlertEngine {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            book: Mutex::new(AlertBook::default()),
            callbacks: RwLock::new(HashMap::new()),
        }
    }

    /// Register a rule. Rejected configs never enter the rule set.
    pub fn register_rule(&self, rule: AlertRule) -> Result<(), AlertError> {
        if rule.rule_id.is_empty() {
            return Err(AlertError::InvalidRule {
                rule_id: "<empty>".to_string(),
                reason: "rule_id must not be empty".to_string(),
            });
        }
        let mut previous = 0u64;
        for (i, step) in rule.escalation_ladder.iter().enumerate() {
            if i > 0 && step.after_secs <= previous {
                return Err(AlertError::InvalidRule {
                    rule_id: rule.rule_id.clone(),
                    reason: format!(
                        "escalation ladder must be strictly increasing (entry {} at {}s)",
                        i, step.after_secs
                    ),
                });
            }
            previous = step.after_secs;
        }

        info!("Registered rule {} ({})", rule.rule_id, rule.name);
        self.write_rules().insert(rule.rule_id.clone(), rule);
        Ok(())
    }

    /// Toggle a rule on or off
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> Result<(), AlertError> {
        let mut rules = self.write_rules();
        let rule = rules
            .get_mut(rule_id)
            .ok_or_else(|| AlertError::UnknownRule(rule_id.to_string()))?;
        rule.enabled = enabled;
        info!("Rule {} {}", rule_id, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Register a named callback for ladder actions
    pub fn register_callback(&self, name: &str, callback: EscalationCallback) {
        self.callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), callback);
    }

    /// Evaluate every enabled, non-suppressed rule against the tick's
    /// metric bindings. Returns only alerts created by this call.
    pub fn evaluate(
        &self,
        metrics: &HashMap<String, f64>,
        thresholds: &dyn ThresholdSource,
    ) -> Vec<Alert> {
        let now = Utc::now();
        let today = now.date_naive();
        let rules: Vec<AlertRule> = self.read_rules().values().cloned().collect();

        let mut created = Vec::new();
        let mut book = self.lock_book();

        // Identity keys from previous days can never collide again.
        let today_suffix = format!(":{}", today);
        book.identities.retain(|key| key.ends_with(&today_suffix));

        for rule in rules {
            if !rule.enabled {
                continue;
            }
            if let Some(until) = book.suppressed_until.get(&rule.rule_id) {
                if now < *until {
                    debug!("Rule {} suppressed until {}", rule.rule_id, until);
                    continue;
                }
            }

            let fired = match rule.condition.evaluate(metrics, thresholds) {
                Ok(fired) => fired,
                Err(e) => {
                    // Fail safe: an unevaluable condition never fires.
                    warn!("Rule {} condition error, treating as false: {}", rule.rule_id, e);
                    false
                }
            };
            if !fired {
                continue;
            }

            let identity = identity_key(&rule.rule_id, today);
            if book.identities.contains(&identity) {
                debug!("Rule {} already fired today, skipping", rule.rule_id);
                continue;
            }

            let alert = Alert {
                id: Uuid::new_v4(),
                rule_id: rule.rule_id.clone(),
                severity: rule.severity,
                status: AlertStatus::Active,
                title: rule.name.clone(),
                message: format!("{} triggered: {}", rule.name, rule.condition),
                details: serde_json::json!({
                    "condition": rule.condition.to_string(),
                    "metrics": metrics,
                }),
                created_at: now,
                updated_at: now,
                acknowledged_at: None,
                resolved_at: None,
                escalation_level: 0,
                notification_count: 0,
                owner: None,
                channels: rule.channels.clone(),
            };

            info!(
                "Alert {} created for rule {} (severity {:?})",
                alert.id, rule.rule_id, alert.severity
            );
            book.identities.insert(identity);
            book.suppressed_until.insert(
                rule.rule_id.clone(),
                now + Duration::seconds(rule.suppression_window_secs as i64),
            );
            book.active.insert(alert.id, alert.clone());
            book.push_history(alert.clone());
            created.push(alert);
        }

        created
    }

    /// Acknowledge an active alert
    pub fn acknowledge(&self, id: Uuid) -> Result<Alert, AlertError> {
        let mut book = self.lock_book();
        let alert = book
            .active
            .get_mut(&id)
            .ok_or(AlertError::UnknownAlert(id))?;

        if alert.status != AlertStatus::Active {
            return Err(AlertError::InvalidTransition {
                id,
                from: alert.status,
                to: AlertStatus::Acknowledged,
            });
        }

        let now = Utc::now();
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_at = Some(now);
        alert.updated_at = now;
        info!("Alert {} acknowledged", id);
        Ok(alert.clone())
    }

    /// Resolve an active or acknowledged alert
    pub fn resolve(&self, id: Uuid) -> Result<Alert, AlertError> {
        let mut book = self.lock_book();
        let status = book
            .active
            .get(&id)
            .map(|a| a.status)
            .ok_or(AlertError::UnknownAlert(id))?;

        if !matches!(status, AlertStatus::Active | AlertStatus::Acknowledged) {
            return Err(AlertError::InvalidTransition {
                id,
                from: status,
                to: AlertStatus::Resolved,
            });
        }

        let mut alert = book
            .active
            .remove(&id)
            .ok_or(AlertError::UnknownAlert(id))?;
        let now = Utc::now();
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        alert.updated_at = now;
        book.push_history(alert.clone());
        info!("Alert {} resolved", id);
        Ok(alert)
    }

    /// Advance escalation ladders and force-resolve stale alerts.
    ///
    /// A delayed tick still advances each alert by at most one level.
    pub fn escalation_pass(
        &self,
        now: DateTime<Utc>,
        auto_resolve_after: Duration,
    ) -> EscalationOutcome {
        let rules = self.read_rules().clone();
        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let mut outcome = EscalationOutcome::default();
        let mut book = self.lock_book();
        let ids: Vec<Uuid> = book.active.keys().copied().collect();

        for id in ids {
            let Some(alert) = book.active.get(&id) else { continue };
            if alert.status != AlertStatus::Active {
                continue; // acknowledged alerts never escalate
            }

            if now - alert.created_at >= auto_resolve_after {
                let mut stale = match book.active.remove(&id) {
                    Some(alert) => alert,
                    None => continue,
                };
                warn!(
                    "Alert {} exceeded the {}h auto-resolve horizon, force-resolving",
                    id,
                    auto_resolve_after.num_hours()
                );
                stale.status = AlertStatus::Resolved;
                stale.resolved_at = Some(now);
                stale.updated_at = now;
                book.push_history(stale.clone());
                outcome.auto_resolved.push(stale);
                continue;
            }

            let Some(rule) = rules.get(&alert.rule_id) else { continue };
            let level = alert.escalation_level as usize;
            let Some(step) = rule.escalation_ladder.get(level) else { continue };
            if (now - alert.created_at).num_seconds() < step.after_secs as i64 {
                continue;
            }

            let actions = step.actions.clone();
            let alert = match book.active.get_mut(&id) {
                Some(alert) => alert,
                None => continue,
            };

            for action in &actions {
                match action {
                    EscalationAction::RaiseSeverity(severity) => {
                        alert.severity = alert.severity.max(*severity);
                    }
                    EscalationAction::AddChannel(channel) => {
                        alert.channels.insert(*channel);
                    }
                    EscalationAction::AssignOwner(owner) => {
                        alert.owner = Some(owner.clone());
                    }
                    EscalationAction::InvokeCallback(name) => {
                        if let Some(callback) = callbacks.get(name) {
                            let snapshot = alert.clone();
                            // A panicking callback must not kill the tick.
                            if catch_unwind(AssertUnwindSafe(|| callback(&snapshot))).is_err() {
                                warn!("Escalation callback {} panicked", name);
                            }
                        } else {
                            warn!("Escalation callback {} not registered", name);
                        }
                    }
                }
            }

            alert.escalation_level += 1;
            alert.updated_at = now;
            info!(
                "Alert {} escalated to level {} (severity {:?})",
                id, alert.escalation_level, alert.severity
            );
            outcome.escalated.push(alert.clone());
        }

        outcome
    }

    /// Active alerts, optionally at or above a severity floor
    pub fn get_active(&self, severity_floor: Option<Severity>) -> Vec<Alert> {
        let book = self.lock_book();
        let mut alerts: Vec<Alert> = book
            .active
            .values()
            .filter(|a| severity_floor.map_or(true, |floor| a.severity >= floor))
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.created_at);
        alerts
    }

    /// Count dispatch attempts against an alert
    pub fn record_notifications(&self, id: Uuid, attempts: u32) {
        let mut book = self.lock_book();
        if let Some(alert) = book.active.get_mut(&id) {
            alert.notification_count += attempts;
            alert.updated_at = Utc::now();
        }
    }

    /// Historical alerts, oldest first
    pub fn history(&self) -> Vec<Alert> {
        self.lock_book().history.iter().cloned().collect()
    }

    /// Registered rules
    pub fn rules(&self) -> Vec<AlertRule> {
        self.read_rules().values().cloned().collect()
    }

    /// Capture lifecycle state for persistence
    pub fn snapshot(&self) -> AlertBookSnapshot {
        let book = self.lock_book();
        AlertBookSnapshot {
            active: book.active.values().cloned().collect(),
            identities: book.identities.iter().cloned().collect(),
            suppressed_until: book.suppressed_until.clone(),
            history: book.history.iter().cloned().collect(),
        }
    }

    /// Restore lifecycle state from a snapshot (replaces current state)
    pub fn restore(&self, snapshot: AlertBookSnapshot) {
        let mut book = self.lock_book();
        book.active = snapshot
            .active
            .into_iter()
            .map(|alert| (alert.id, alert))
            .collect();
        book.identities = snapshot.identities.into_iter().collect();
        book.suppressed_until = snapshot.suppressed_until;
        book.history = snapshot.history.into_iter().collect();
        info!(
            "Restored alert book: {} active, {} suppression windows",
            book.active.len(),
            book.suppressed_until.len()
        );
    }

    fn lock_book(&self) -> std::sync::MutexGuard<'_, AlertBook> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_rules(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, AlertRule>> {
        self.rules.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_rules(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, AlertRule>> {
        self.rules.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new()
    }
}
