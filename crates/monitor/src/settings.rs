//! Engine Settings

use anomaly_detect::DetectorConfig;
use escalation::SchedulerConfig;
use log_patterns::MinerConfig;
use notifier::NotificationSettings;
use serde::Deserialize;

/// Top-level engine settings, loadable from a file plus environment
/// overrides (`MONITOR__` prefix)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Samples retained per metric
    pub metric_capacity: usize,
    /// Seconds between threshold recomputes per metric
    pub recompute_interval_secs: i64,
    pub detector: DetectorConfig,
    pub miner: MinerConfig,
    pub scheduler: SchedulerConfig,
    pub notifications: NotificationSettings,
    /// Snapshot file path; `None` disables persistence
    pub snapshot_path: Option<String>,
    /// Queued log batches the mining loop buffers before back-pressure
    pub log_queue_depth: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            metric_capacity: 1000,
            recompute_interval_secs: 300,
            detector: DetectorConfig::default(),
            miner: MinerConfig::default(),
            scheduler: SchedulerConfig::default(),
            notifications: NotificationSettings::default(),
            snapshot_path: None,
            log_queue_depth: 64,
        }
    }
}

impl EngineSettings {
    /// Layered load: defaults, then an optional file, then environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("MONITOR")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.metric_capacity, 1000);
        assert_eq!(settings.recompute_interval_secs, 300);
        assert_eq!(settings.scheduler.tick_secs, 60);
        assert_eq!(settings.miner.min_frequency, 3);
        assert!(settings.snapshot_path.is_none());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let settings = EngineSettings::load(None).unwrap();
        assert_eq!(settings.metric_capacity, 1000);
        assert!(!settings.notifications.email.enabled);
    }
}
