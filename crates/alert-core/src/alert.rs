//! Alert Records and Lifecycle States

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Alert severity, ordered
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Lifecycle state of an alert.
///
/// `Suppressed` never appears on a live alert; it marks historical
/// records of fires swallowed by a rule's cooldown gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Suppressed,
}

/// Notification channel kinds
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Webhook,
    Chat,
    Desktop,
}

/// One firing of a rule, with a lifecycle of its own
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub rule_id: String,
    /// May only increase, via escalation
    pub severity: Severity,
    pub status: AlertStatus,
    pub title: String,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Monotonic, starts at 0, advances one ladder entry at a time
    pub escalation_level: u32,
    pub notification_count: u32,
    pub owner: Option<String>,
    /// Effective channels; escalation may add to the rule's set
    pub channels: BTreeSet<ChannelKind>,
}

impl Alert {
    /// Elapsed seconds since creation
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_severity_serializes_uppercase() {
        let json = serde_json::to_string(&Severity::High).unwrap();
        assert_eq!(json, "\"HIGH\"");
    }
}
