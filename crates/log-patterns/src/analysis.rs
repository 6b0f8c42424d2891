//! Batch Log Analysis

use crate::entry::{LogEntry, LogLevel};
use crate::miner::{LogPattern, PatternMiner};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Buckets the analysis range is split into for rate comparison
const RATE_BUCKETS: i64 = 10;
/// Entries a bucket needs before its rate is trusted
const MIN_BUCKET_ENTRIES: usize = 3;

/// An error-rate spike inside the analyzed range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogAnomaly {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// ERROR/CRITICAL share inside the window
    pub error_rate: f64,
    /// ERROR/CRITICAL share across the whole batch
    pub baseline: f64,
    pub entry_count: usize,
}

/// Result of one batch analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogAnalysis {
    pub patterns: Vec<LogPattern>,
    pub anomalies: Vec<LogAnomaly>,
    pub recommendations: Vec<String>,
}

impl PatternMiner {
    /// Analyze one batch: mine patterns, flag error-rate spikes, and
    /// attach remediation hints. `levels` filters entries; empty means
    /// all levels.
    pub fn analyze(
        &self,
        entries: &[LogEntry],
        range: (DateTime<Utc>, DateTime<Utc>),
        levels: &[LogLevel],
    ) -> LogAnalysis {
        let selected: Vec<LogEntry> = entries
            .iter()
            .filter(|e| e.timestamp >= range.0 && e.timestamp <= range.1)
            .filter(|e| levels.is_empty() || levels.contains(&e.level))
            .cloned()
            .collect();

        let patterns = self.mine(&selected);
        let anomalies = rate_spikes(&selected, range);

        let mut recommendations = Vec::new();
        for pattern in &patterns {
            let hint = match self.recommendation(&pattern.pattern_id) {
                Some(hint) => hint.to_string(),
                None => format!("Investigate new failure signature: {}", pattern.description),
            };
            if !recommendations.contains(&hint) {
                recommendations.push(hint);
            }
        }

        LogAnalysis {
            patterns,
            anomalies,
            recommendations,
        }
    }
}

/// Buckets with an error share well above the batch baseline
fn rate_spikes(entries: &[LogEntry], range: (DateTime<Utc>, DateTime<Utc>)) -> Vec<LogAnomaly> {
    let span = range.1 - range.0;
    if entries.is_empty() || span <= Duration::zero() {
        return Vec::new();
    }

    let total_errors = entries.iter().filter(|e| e.level.is_error()).count();
    let baseline = total_errors as f64 / entries.len() as f64;
    if baseline <= 0.0 {
        return Vec::new();
    }

    let bucket_span = span / RATE_BUCKETS as i32;
    if bucket_span <= Duration::zero() {
        return Vec::new();
    }

    let mut anomalies = Vec::new();
    for bucket in 0..RATE_BUCKETS {
        let start = range.0 + bucket_span * bucket as i32;
        let end = if bucket == RATE_BUCKETS - 1 {
            range.1
        } else {
            start + bucket_span
        };

        let in_bucket: Vec<&LogEntry> = entries
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp < end)
            .collect();
        if in_bucket.len() < MIN_BUCKET_ENTRIES {
            continue;
        }

        let errors = in_bucket.iter().filter(|e| e.level.is_error()).count();
        let rate = errors as f64 / in_bucket.len() as f64;
        if rate > baseline * 2.0 && rate >= 0.5 {
            anomalies.push(LogAnomaly {
                window_start: start,
                window_end: end,
                error_rate: rate,
                baseline,
                entry_count: in_bucket.len(),
            });
        }
    }
    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::MinerConfig;

    fn entry_at(ts: DateTime<Utc>, level: LogLevel, message: &str) -> LogEntry {
        LogEntry {
            timestamp: ts,
            level,
            source: "worker".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_analyze_filters_by_level() {
        let miner = PatternMiner::new(MinerConfig::default());
        let now = Utc::now();
        let range = (now - Duration::minutes(10), now);

        let entries: Vec<LogEntry> = (0..6)
            .map(|i| {
                let level = if i % 2 == 0 {
                    LogLevel::Debug
                } else {
                    LogLevel::Error
                };
                entry_at(now - Duration::minutes(5), level, "request timed out")
            })
            .collect();

        let analysis = miner.analyze(&entries, range, &[LogLevel::Error]);
        let timeout = analysis
            .patterns
            .iter()
            .find(|p| p.pattern_id == "timeout")
            .unwrap();
        // Only the 3 error entries pass the filter.
        assert_eq!(timeout.frequency, 3);
    }

    #[test]
    fn test_analyze_attaches_recommendations() {
        let miner = PatternMiner::new(MinerConfig::default());
        let now = Utc::now();
        let range = (now - Duration::minutes(10), now);

        let entries: Vec<LogEntry> = (0..3)
            .map(|_| entry_at(now - Duration::minutes(2), LogLevel::Error, "disk full"))
            .collect();

        let analysis = miner.analyze(&entries, range, &[]);
        assert_eq!(analysis.recommendations.len(), 1);
        assert!(analysis.recommendations[0].contains("disk"));
    }

    #[test]
    fn test_rate_spike_detection() {
        let now = Utc::now();
        let start = now - Duration::minutes(100);
        let range = (start, now);

        let mut entries = Vec::new();
        // Steady low-error background across the range.
        for i in 0..50 {
            entries.push(entry_at(
                start + Duration::minutes(2 * i),
                LogLevel::Info,
                "tick",
            ));
        }
        // Error burst inside one 10-minute bucket.
        for i in 0..8 {
            entries.push(entry_at(
                start + Duration::minutes(41) + Duration::seconds(i * 30),
                LogLevel::Error,
                "boom",
            ));
        }

        let anomalies = rate_spikes(&entries, range);
        assert_eq!(anomalies.len(), 1);
        assert!(anomalies[0].error_rate > anomalies[0].baseline * 2.0);
    }

    #[test]
    fn test_no_spikes_without_errors() {
        let now = Utc::now();
        let range = (now - Duration::minutes(10), now);
        let entries: Vec<LogEntry> = (0..20)
            .map(|i| {
                entry_at(
                    now - Duration::minutes(10) + Duration::seconds(i * 25),
                    LogLevel::Info,
                    "tick",
                )
            })
            .collect();

        assert!(rate_spikes(&entries, range).is_empty());
    }
}
