//! Declarative Channel Settings
//!
//! Unrecognized keys are ignored on deserialization. A channel that is
//! enabled but missing required keys is disabled with a logged warning
//! when the dispatcher is built.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The full notification channel map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub email: EmailSettings,
    pub webhook: WebhookSettings,
    pub chat: ChatSettings,
    pub desktop: DesktopSettings,
}

/// SMTP email channel settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub enabled: bool,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
}

/// Generic HTTP webhook channel settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    pub enabled: bool,
    pub url: Option<String>,
    pub headers: HashMap<String, String>,
    /// Per-request timeout in seconds
    pub timeout: Option<u64>,
}

/// Chat webhook channel settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub channel: Option<String>,
}

/// Local desktop notice settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DesktopSettings {
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecognized_keys_are_ignored() {
        let json = r#"{
            "email": {"enabled": false, "legacy_option": true},
            "webhook": {"enabled": true, "url": "https://example.test/hook"},
            "future_channel": {"enabled": true}
        }"#;

        let settings: NotificationSettings = serde_json::from_str(json).unwrap();
        assert!(!settings.email.enabled);
        assert!(settings.webhook.enabled);
        assert_eq!(
            settings.webhook.url.as_deref(),
            Some("https://example.test/hook")
        );
    }

    #[test]
    fn test_missing_sections_default_to_disabled() {
        let settings: NotificationSettings = serde_json::from_str("{}").unwrap();
        assert!(!settings.email.enabled);
        assert!(!settings.webhook.enabled);
        assert!(!settings.chat.enabled);
        assert!(!settings.desktop.enabled);
    }
}
