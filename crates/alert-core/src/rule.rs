//! Alert Rule Definitions

use crate::alert::{ChannelKind, Severity};
use crate::condition::Condition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One action taken when a ladder entry is crossed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    /// Raise severity to at least this level (never lowers)
    RaiseSeverity(Severity),
    AddChannel(ChannelKind),
    AssignOwner(String),
    /// Invoke a callback registered on the engine by name
    InvokeCallback(String),
}

/// One entry of a rule's escalation ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationStep {
    /// Seconds after alert creation before this entry applies
    pub after_secs: u64,
    pub actions: Vec<EscalationAction>,
}

/// A registered alerting rule. Immutable after registration except the
/// enabled toggle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub rule_id: String,
    pub name: String,
    pub condition: Condition,
    pub severity: Severity,
    /// Metric whose adaptive threshold this rule tracks, if any
    pub threshold_ref: Option<String>,
    /// Cooldown after a fire during which the rule is ignored
    pub suppression_window_secs: u64,
    /// Ordered by strictly increasing `after_secs`
    pub escalation_ladder: Vec<EscalationStep>,
    pub channels: BTreeSet<ChannelKind>,
    pub enabled: bool,
}

impl AlertRule {
    /// A minimal enabled rule with no ladder and no channels
    pub fn new(rule_id: &str, name: &str, condition: Condition, severity: Severity) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            name: name.to_string(),
            condition,
            severity,
            threshold_ref: None,
            suppression_window_secs: 300,
            escalation_ladder: Vec::new(),
            channels: BTreeSet::new(),
            enabled: true,
        }
    }

    /// Builder-style suppression window override
    pub fn with_suppression_window(mut self, secs: u64) -> Self {
        self.suppression_window_secs = secs;
        self
    }

    /// Builder-style ladder override
    pub fn with_ladder(mut self, ladder: Vec<EscalationStep>) -> Self {
        self.escalation_ladder = ladder;
        self
    }

    /// Builder-style channel set override
    pub fn with_channels(mut self, channels: impl IntoIterator<Item = ChannelKind>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }
}
