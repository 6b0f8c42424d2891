//! Dispatch Fan-Out

use crate::channels::{Channel, DispatchError};
use alert_core::{Alert, ChannelKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Dispatch attempts retained in history
const HISTORY_CAP: usize = 1000;
/// Outer per-send deadline; channels also carry their own timeouts
const SEND_TIMEOUT_SECS: u64 = 30;

/// One dispatch attempt, success or failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub alert_id: uuid::Uuid,
    pub channel: ChannelKind,
    pub success: bool,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Concurrent notification dispatcher
pub struct NotificationDispatcher {
    channels: HashMap<ChannelKind, Arc<Channel>>,
    send_timeout: Duration,
    history: Mutex<VecDeque<DispatchRecord>>,
}

impl NotificationDispatcher {
    /// Build a dispatcher from the declarative settings map
    pub fn new(settings: &crate::settings::NotificationSettings) -> Self {
        let channels: HashMap<ChannelKind, Arc<Channel>> = Channel::from_settings(settings)
            .into_iter()
            .map(|channel| (channel.kind(), Arc::new(channel)))
            .collect();
        debug!("Dispatcher configured with {} channels", channels.len());

        Self {
            channels,
            send_timeout: Duration::from_secs(SEND_TIMEOUT_SECS),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAP)),
        }
    }

    /// Replace or add one channel (tests, custom transports)
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channels.insert(channel.kind(), Arc::new(channel));
        self
    }

    /// Kinds that survived configuration
    pub fn configured_kinds(&self) -> BTreeSet<ChannelKind> {
        self.channels.keys().copied().collect()
    }

    /// Send one alert to the requested kinds concurrently.
    ///
    /// Every attempt is recorded; failures never abort sibling sends.
    pub async fn dispatch(&self, alert: &Alert, kinds: &BTreeSet<ChannelKind>) -> Vec<DispatchRecord> {
        let mut records = Vec::new();
        let mut tasks: JoinSet<(ChannelKind, Result<(), DispatchError>)> = JoinSet::new();

        for kind in kinds {
            match self.channels.get(kind) {
                Some(channel) => {
                    let channel = Arc::clone(channel);
                    let alert = alert.clone();
                    let kind = *kind;
                    let deadline = self.send_timeout;
                    tasks.spawn(async move {
                        let result =
                            match tokio::time::timeout(deadline, channel.send(&alert)).await {
                                Ok(result) => result,
                                Err(_) => Err(DispatchError::Timeout(deadline.as_secs())),
                            };
                        (kind, result)
                    });
                }
                None => {
                    records.push(self.record(alert, *kind, Err(DispatchError::NotConfigured(*kind))));
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((kind, result)) => records.push(self.record(alert, kind, result)),
                Err(e) => warn!("Dispatch task for alert {} failed to join: {}", alert.id, e),
            }
        }

        records
    }

    /// Dispatch history, oldest first
    pub fn history(&self) -> Vec<DispatchRecord> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn record(
        &self,
        alert: &Alert,
        kind: ChannelKind,
        result: Result<(), DispatchError>,
    ) -> DispatchRecord {
        let record = DispatchRecord {
            alert_id: alert.id,
            channel: kind,
            success: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
            at: Utc::now(),
        };

        if let Some(error) = &record.error {
            warn!("Dispatch to {:?} failed for alert {}: {}", kind, alert.id, error);
        } else {
            debug!("Dispatch to {:?} succeeded for alert {}", kind, alert.id);
        }

        let mut history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while history.len() >= HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(record.clone());
        record
    }
}
