//! Threshold Manager Implementation

use crate::stats;
use anomaly_detect::IsolationForest;
use chrono::{DateTime, Duration, Utc};
use metric_store::{MetricSample, MetricStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Minimum seconds between recomputes for one metric
pub const RECOMPUTE_INTERVAL_SECS: i64 = 300;

/// Samples required before any recompute runs
const MIN_WINDOW_SAMPLES: usize = 10;
/// Samples required before the model candidate participates
const MIN_MODEL_SAMPLES: usize = 50;
/// Synthetic values swept when deriving the model candidate
const SWEEP_POINTS: usize = 50;
/// Sweep scores at or below this quantile count as inliers
const INLIER_QUANTILE: f64 = 0.10;
/// Audit history retention
const HISTORY_CAP: usize = 1000;

/// Threshold configuration for one metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub metric_name: String,
    /// Current adaptive threshold; the only field recompute mutates
    pub base_threshold: f64,
    /// Upper cap multiplier applied to the blended candidate
    pub adaptive_factor: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    /// Samples considered per recompute
    pub window_size: usize,
    /// Multiplier on stddev for the statistical candidate
    pub std_multiplier: f64,
    /// Slope magnitude above which the trend candidate reacts
    pub trend_sensitivity: f64,
}

impl ThresholdConfig {
    /// A reasonable starting config for a metric
    pub fn new(metric_name: &str, base_threshold: f64) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            base_threshold,
            adaptive_factor: 2.0,
            min_threshold: base_threshold * 0.5,
            max_threshold: base_threshold * 2.0,
            window_size: 100,
            std_multiplier: 2.0,
            trend_sensitivity: 0.5,
        }
    }
}

/// One audit entry for a threshold change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdChange {
    pub metric_name: String,
    pub previous: f64,
    pub new: f64,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Threshold registration/recompute failures
#[derive(Debug, Clone, Error)]
pub enum ThresholdError {
    #[error("invalid bounds for {metric}: min {min} <= base {base} <= max {max} violated")]
    InvalidBounds {
        metric: String,
        min: f64,
        base: f64,
        max: f64,
    },

    #[error("invalid {field} for {metric}: must be positive")]
    NonPositive { metric: String, field: &'static str },

    #[error("metric_name must not be empty")]
    EmptyName,

    #[error("metric not registered: {0}")]
    UnknownMetric(String),
}

/// Adaptive threshold manager over the shared metric store
pub struct ThresholdManager {
    store: Arc<MetricStore>,
    configs: RwLock<HashMap<String, ThresholdConfig>>,
    last_recompute: Mutex<HashMap<String, DateTime<Utc>>>,
    history: Mutex<VecDeque<ThresholdChange>>,
    recompute_interval: Duration,
}

impl ThresholdManager {
    /// Create a manager writing samples into the given store
    pub fn new(store: Arc<MetricStore>) -> Self {
        Self {
            store,
            configs: RwLock::new(HashMap::new()),
            last_recompute: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAP)),
            recompute_interval: Duration::seconds(RECOMPUTE_INTERVAL_SECS),
        }
    }

    /// Override the per-metric recompute throttle (tests, tuning)
    pub fn with_recompute_interval(mut self, interval: Duration) -> Self {
        self.recompute_interval = interval;
        self
    }

    /// Register or replace a metric's threshold config.
    ///
    /// Re-registration replaces the stored config; restarts are expected
    /// to re-register every metric they track.
    pub fn register(&self, config: ThresholdConfig) -> Result<(), ThresholdError> {
        validate(&config)?;

        let mut configs = write_lock(&self.configs);
        if configs.contains_key(&config.metric_name) {
            debug!("Replacing threshold config for {}", config.metric_name);
        } else {
            info!(
                "Registered threshold for {} (base {}, bounds [{}, {}])",
                config.metric_name, config.base_threshold, config.min_threshold, config.max_threshold
            );
        }
        configs.insert(config.metric_name.clone(), config);
        Ok(())
    }

    /// Append a sample and recompute if the throttle allows it
    pub fn ingest(&self, name: &str, value: f64, timestamp: DateTime<Utc>) {
        self.store.append(MetricSample {
            name: name.to_string(),
            value,
            timestamp,
        });

        let due = {
            let mut last = lock(&self.last_recompute);
            let now = Utc::now();
            match last.get(name) {
                Some(at) if now - *at < self.recompute_interval => false,
                _ => {
                    last.insert(name.to_string(), now);
                    true
                }
            }
        };

        if due {
            if let Err(e) = self.recompute(name) {
                // Unregistered metrics still collect history; nothing to adapt.
                debug!("Skipping recompute for {}: {}", name, e);
            }
        }
    }

    /// Recompute the adaptive threshold for one metric.
    ///
    /// Below 10 samples this is a no-op. The result is the median of the
    /// available candidates, capped at `base * adaptive_factor` and
    /// clamped into `[min, max]`.
    pub fn recompute(&self, name: &str) -> Result<Option<f64>, ThresholdError> {
        let config = self
            .config(name)
            .ok_or_else(|| ThresholdError::UnknownMetric(name.to_string()))?;

        let values = self.store.values(name);
        let window_start = values.len().saturating_sub(config.window_size);
        let window = &values[window_start..];
        if window.len() < MIN_WINDOW_SAMPLES {
            return Ok(None);
        }

        let mut candidates = Vec::with_capacity(3);
        let mut reasons = Vec::with_capacity(3);

        let statistical = stats::mean(window) + config.std_multiplier * stats::stddev(window);
        candidates.push(statistical);
        reasons.push(format!("statistical {:.3}", statistical));

        let trend = trend_candidate(&config, window);
        candidates.push(trend);
        reasons.push(format!("trend {:.3}", trend));

        if window.len() >= MIN_MODEL_SAMPLES {
            if let Some(model) = model_candidate(name, window) {
                candidates.push(model);
                reasons.push(format!("model {:.3}", model));
            }
        }

        let blended = stats::median(&candidates);
        let capped = blended.min(config.base_threshold * config.adaptive_factor);
        if !capped.is_finite() {
            // NaN samples must never corrupt the bounds invariant.
            warn!("Discarding non-finite threshold candidate for {}", name);
            return Ok(None);
        }
        let new_threshold = capped.clamp(config.min_threshold, config.max_threshold);
        let previous = config.base_threshold;

        {
            let mut configs = write_lock(&self.configs);
            if let Some(stored) = configs.get_mut(name) {
                stored.base_threshold = new_threshold;
            }
        }

        self.push_history(ThresholdChange {
            metric_name: name.to_string(),
            previous,
            new: new_threshold,
            reason: format!(
                "median of [{}], capped {:.3}, clamped [{:.3}, {:.3}]",
                reasons.join(", "),
                previous * config.adaptive_factor,
                config.min_threshold,
                config.max_threshold
            ),
            at: Utc::now(),
        });

        if (new_threshold - previous).abs() > f64::EPSILON {
            info!(
                "Threshold for {} moved {:.3} -> {:.3}",
                name, previous, new_threshold
            );
        }
        Ok(Some(new_threshold))
    }

    /// Current threshold for a metric
    pub fn threshold(&self, name: &str) -> Option<f64> {
        read_lock(&self.configs).get(name).map(|c| c.base_threshold)
    }

    /// Current config for a metric
    pub fn config(&self, name: &str) -> Option<ThresholdConfig> {
        read_lock(&self.configs).get(name).cloned()
    }

    /// All registered configs
    pub fn configs(&self) -> Vec<ThresholdConfig> {
        read_lock(&self.configs).values().cloned().collect()
    }

    /// Audit history, oldest first
    pub fn history(&self) -> Vec<ThresholdChange> {
        lock(&self.history).iter().cloned().collect()
    }

    /// Restore a previously persisted config without validation noise
    pub fn restore(&self, config: ThresholdConfig) {
        if validate(&config).is_ok() {
            write_lock(&self.configs).insert(config.metric_name.clone(), config);
        } else {
            warn!(
                "Discarding persisted threshold for {}: bounds no longer valid",
                config.metric_name
            );
        }
    }

    /// Restore a persisted audit history (replaces the in-memory log)
    pub fn restore_history(&self, changes: Vec<ThresholdChange>) {
        let mut history = lock(&self.history);
        history.clear();
        for change in changes.into_iter().rev().take(HISTORY_CAP).rev() {
            history.push_back(change);
        }
    }

    fn push_history(&self, change: ThresholdChange) {
        let mut history = lock(&self.history);
        while history.len() >= HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(change);
    }
}

fn validate(config: &ThresholdConfig) -> Result<(), ThresholdError> {
    if config.metric_name.is_empty() {
        return Err(ThresholdError::EmptyName);
    }
    if !(config.min_threshold <= config.base_threshold
        && config.base_threshold <= config.max_threshold)
    {
        return Err(ThresholdError::InvalidBounds {
            metric: config.metric_name.clone(),
            min: config.min_threshold,
            base: config.base_threshold,
            max: config.max_threshold,
        });
    }
    if config.adaptive_factor <= 0.0 {
        return Err(ThresholdError::NonPositive {
            metric: config.metric_name.clone(),
            field: "adaptive_factor",
        });
    }
    if config.window_size == 0 {
        return Err(ThresholdError::NonPositive {
            metric: config.metric_name.clone(),
            field: "window_size",
        });
    }
    if config.trend_sensitivity <= 0.0 {
        return Err(ThresholdError::NonPositive {
            metric: config.metric_name.clone(),
            field: "trend_sensitivity",
        });
    }
    Ok(())
}

/// Scale the current base by up to ±10% proportionally to slope excess
fn trend_candidate(config: &ThresholdConfig, window: &[f64]) -> f64 {
    let slope = stats::slope(window);
    if slope.abs() <= config.trend_sensitivity {
        return config.base_threshold;
    }
    let proportion = (slope.abs() / config.trend_sensitivity).min(1.0) * 0.1;
    config.base_threshold * (1.0 + slope.signum() * proportion)
}

/// Largest swept value still scoring inside the inlier quantile
fn model_candidate(name: &str, window: &[f64]) -> Option<f64> {
    let min = window.iter().cloned().fold(f64::MAX, f64::min);
    let max = window.iter().cloned().fold(f64::MIN, f64::max);
    if !(min.is_finite() && max.is_finite()) || max <= min {
        return None;
    }

    let forest = IsolationForest::fit(name, window);
    let span = max - min;
    let step = (span + span / 2.0) / (SWEEP_POINTS - 1) as f64;

    let sweep: Vec<(f64, f64)> = (0..SWEEP_POINTS)
        .map(|i| {
            let value = min + step * i as f64;
            (value, forest.score(value))
        })
        .collect();

    let scores: Vec<f64> = sweep.iter().map(|(_, s)| *s).collect();
    let cutoff = crate::stats::quantile(&scores, INLIER_QUANTILE);

    sweep
        .iter()
        .filter(|(_, score)| *score <= cutoff)
        .map(|(value, _)| *value)
        .fold(None, |best, v| match best {
            Some(b) if b >= v => Some(b),
            _ => Some(v),
        })
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_lock<K, V>(lock: &RwLock<HashMap<K, V>>) -> std::sync::RwLockReadGuard<'_, HashMap<K, V>> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<K, V>(lock: &RwLock<HashMap<K, V>>) -> std::sync::RwLockWriteGuard<'_, HashMap<K, V>> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
