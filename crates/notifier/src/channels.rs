//! Notification Channels

use crate::settings::{ChatSettings, DesktopSettings, EmailSettings, WebhookSettings};
use alert_core::{Alert, ChannelKind};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Per-channel send failures. Recorded, never propagated into the
/// alert lifecycle.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("channel {0:?} is not configured")]
    NotConfigured(ChannelKind),

    #[error("send timed out after {0}s")]
    Timeout(u64),

    #[error("email send failed: {0}")]
    Email(String),

    #[error("http send failed: {0}")]
    Http(String),

    #[error("desktop notice failed: {0}")]
    Desktop(String),
}

/// One configured notification channel
pub enum Channel {
    Email(EmailChannel),
    Webhook(WebhookChannel),
    Chat(ChatChannel),
    Desktop(DesktopChannel),
}

impl Channel {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Email(_) => ChannelKind::Email,
            Channel::Webhook(_) => ChannelKind::Webhook,
            Channel::Chat(_) => ChannelKind::Chat,
            Channel::Desktop(_) => ChannelKind::Desktop,
        }
    }

    /// Send one alert through this channel
    pub async fn send(&self, alert: &Alert) -> Result<(), DispatchError> {
        match self {
            Channel::Email(c) => c.send(alert).await,
            Channel::Webhook(c) => c.send(alert).await,
            Channel::Chat(c) => c.send(alert).await,
            Channel::Desktop(c) => c.send(alert).await,
        }
    }

    /// Build every enabled, completely configured channel. Enabled
    /// channels missing required keys are dropped with a warning.
    pub fn from_settings(settings: &crate::settings::NotificationSettings) -> Vec<Channel> {
        let mut channels = Vec::new();

        if settings.email.enabled {
            match EmailChannel::new(&settings.email) {
                Ok(channel) => channels.push(Channel::Email(channel)),
                Err(e) => warn!("Email channel disabled: {}", e),
            }
        }
        if settings.webhook.enabled {
            match WebhookChannel::new(&settings.webhook) {
                Ok(channel) => channels.push(Channel::Webhook(channel)),
                Err(e) => warn!("Webhook channel disabled: {}", e),
            }
        }
        if settings.chat.enabled {
            match ChatChannel::new(&settings.chat) {
                Ok(channel) => channels.push(Channel::Chat(channel)),
                Err(e) => warn!("Chat channel disabled: {}", e),
            }
        }
        if settings.desktop.enabled {
            channels.push(Channel::Desktop(DesktopChannel::new(&settings.desktop)));
        }

        channels
    }
}

fn subject_line(alert: &Alert) -> String {
    format!("[{:?}] {}", alert.severity, alert.title)
}

/// SMTP email sends, executed on the blocking pool
pub struct EmailChannel {
    transport: Arc<SmtpTransport>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    pub fn new(settings: &EmailSettings) -> Result<Self, DispatchError> {
        let host = settings
            .smtp_host
            .as_deref()
            .ok_or_else(|| DispatchError::Email("smtp_host is required".to_string()))?;
        let from: Mailbox = settings
            .from
            .as_deref()
            .ok_or_else(|| DispatchError::Email("from address is required".to_string()))?
            .parse()
            .map_err(|e| DispatchError::Email(format!("bad from address: {}", e)))?;

        if settings.to.is_empty() {
            return Err(DispatchError::Email("at least one recipient is required".to_string()));
        }
        let to = settings
            .to
            .iter()
            .map(|addr| {
                addr.parse()
                    .map_err(|e| DispatchError::Email(format!("bad recipient {}: {}", addr, e)))
            })
            .collect::<Result<Vec<Mailbox>, _>>()?;

        let mut builder = SmtpTransport::relay(host)
            .map_err(|e| DispatchError::Email(e.to_string()))?
            .port(settings.smtp_port.unwrap_or(DEFAULT_SMTP_PORT));
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: Arc::new(builder.build()),
            from,
            to,
        })
    }

    async fn send(&self, alert: &Alert) -> Result<(), DispatchError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject_line(alert));
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        let message = builder
            .body(format!("{}\n\n{}", alert.message, alert.details))
            .map_err(|e| DispatchError::Email(e.to_string()))?;

        let transport = Arc::clone(&self.transport);
        let result = tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| DispatchError::Email(format!("send task failed: {}", e)))?;

        result
            .map(|_| debug!("Email sent for alert {}", alert.id))
            .map_err(|e| DispatchError::Email(e.to_string()))
    }
}

/// Generic HTTP webhook posting the alert as JSON
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
}

impl WebhookChannel {
    pub fn new(settings: &WebhookSettings) -> Result<Self, DispatchError> {
        let url = settings
            .url
            .clone()
            .ok_or_else(|| DispatchError::Http("webhook url is required".to_string()))?;
        let timeout = settings.timeout.unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_SECS);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| DispatchError::Http(e.to_string()))?;

        Ok(Self {
            client,
            url,
            headers: settings.headers.clone(),
        })
    }

    async fn send(&self, alert: &Alert) -> Result<(), DispatchError> {
        let mut request = self.client.post(&self.url).json(alert);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::Http(e.to_string()))?;
        response
            .error_for_status()
            .map(|_| debug!("Webhook delivered for alert {}", alert.id))
            .map_err(|e| DispatchError::Http(e.to_string()))
    }
}

/// Chat webhook with a compact text payload
pub struct ChatChannel {
    client: reqwest::Client,
    webhook_url: String,
    channel: Option<String>,
}

impl ChatChannel {
    pub fn new(settings: &ChatSettings) -> Result<Self, DispatchError> {
        let webhook_url = settings
            .webhook_url
            .clone()
            .ok_or_else(|| DispatchError::Http("chat webhook_url is required".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_WEBHOOK_TIMEOUT_SECS))
            .build()
            .map_err(|e| DispatchError::Http(e.to_string()))?;

        Ok(Self {
            client,
            webhook_url,
            channel: settings.channel.clone(),
        })
    }

    async fn send(&self, alert: &Alert) -> Result<(), DispatchError> {
        let payload = serde_json::json!({
            "channel": self.channel,
            "text": format!("{}: {}", subject_line(alert), alert.message),
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DispatchError::Http(e.to_string()))?;
        response
            .error_for_status()
            .map(|_| debug!("Chat notice delivered for alert {}", alert.id))
            .map_err(|e| DispatchError::Http(e.to_string()))
    }
}

/// Local desktop notice via notify-send, with a log fallback when the
/// binary is unavailable
pub struct DesktopChannel;

impl DesktopChannel {
    pub fn new(_settings: &DesktopSettings) -> Self {
        Self
    }

    async fn send(&self, alert: &Alert) -> Result<(), DispatchError> {
        let spawned = tokio::process::Command::new("notify-send")
            .arg(subject_line(alert))
            .arg(&alert.message)
            .output()
            .await;

        match spawned {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(DispatchError::Desktop(format!(
                "notify-send exited with {}",
                output.status
            ))),
            Err(_) => {
                // No desktop stack on this host; the log line is the notice.
                warn!("DESKTOP NOTICE {}: {}", subject_line(alert), alert.message);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::NotificationSettings;

    #[test]
    fn test_enabled_channel_missing_keys_is_dropped() {
        let settings = NotificationSettings {
            webhook: WebhookSettings {
                enabled: true,
                url: None,
                ..Default::default()
            },
            chat: ChatSettings {
                enabled: true,
                webhook_url: Some("https://chat.test/hook".to_string()),
                channel: Some("#ops".to_string()),
            },
            ..Default::default()
        };

        let channels = Channel::from_settings(&settings);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].kind(), ChannelKind::Chat);
    }

    #[test]
    fn test_email_requires_recipients() {
        let settings = EmailSettings {
            enabled: true,
            smtp_host: Some("smtp.test".to_string()),
            from: Some("alerts@test".to_string()),
            to: Vec::new(),
            ..Default::default()
        };
        assert!(EmailChannel::new(&settings).is_err());
    }

    #[test]
    fn test_all_disabled_builds_nothing() {
        let channels = Channel::from_settings(&NotificationSettings::default());
        assert!(channels.is_empty());
    }
}
