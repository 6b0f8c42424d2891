//! Pattern Miner Implementation

use crate::cluster;
use crate::entry::LogEntry;
use crate::matchers::{default_matchers, FixedMatcher};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

/// Severity of a mined pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PatternSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// A recurring log-message shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPattern {
    /// Fixed-matcher name or stable cluster id
    pub pattern_id: String,
    pub description: String,
    /// Monotonic match counter across batches
    pub frequency: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub severity: PatternSeverity,
    /// Example messages, capped at 5
    pub examples: Vec<String>,
}

/// Miner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Matches required within a batch before a new pattern is emitted
    pub min_frequency: usize,
    /// Unclaimed error entries required before clustering runs
    pub min_cluster_entries: usize,
    /// DBSCAN cosine-distance radius
    pub cluster_eps: f64,
    /// DBSCAN core-point density
    pub cluster_min_pts: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            min_frequency: 3,
            min_cluster_entries: 5,
            cluster_eps: 0.4,
            cluster_min_pts: 3,
        }
    }
}

const EXAMPLE_CAP: usize = 5;

/// Two-pass pattern miner with an upsert store keyed by pattern id
pub struct PatternMiner {
    matchers: Vec<FixedMatcher>,
    config: MinerConfig,
    known: Mutex<HashMap<String, LogPattern>>,
}

impl PatternMiner {
    /// Create a miner with the built-in matcher registry
    pub fn new(config: MinerConfig) -> Self {
        let matchers = default_matchers();
        info!(
            "Creating pattern miner with {} fixed matchers (min_frequency {})",
            matchers.len(),
            config.min_frequency
        );
        Self {
            matchers,
            config,
            known: Mutex::new(HashMap::new()),
        }
    }

    /// Mine one batch. Returns the patterns created or updated by it.
    pub fn mine(&self, entries: &[LogEntry]) -> Vec<LogPattern> {
        if entries.is_empty() {
            return Vec::new();
        }

        let mut touched = Vec::new();
        let mut claimed = vec![false; entries.len()];

        // Pass 1: fixed matchers over every entry.
        for matcher in &self.matchers {
            let hits: Vec<usize> = entries
                .iter()
                .enumerate()
                .filter(|(_, e)| matcher.matches(&e.message))
                .map(|(i, _)| i)
                .collect();

            for &i in &hits {
                claimed[i] = true;
            }
            if hits.is_empty() {
                continue;
            }

            let severity = if matcher.forced_critical {
                PatternSeverity::Critical
            } else {
                severity_from_error_ratio(error_ratio(entries, &hits))
            };

            if let Some(pattern) = self.upsert(
                matcher.name,
                matcher.description,
                severity,
                entries,
                &hits,
            ) {
                touched.push(pattern);
            }
        }

        // Pass 2: cluster what the registry did not claim.
        touched.extend(self.discover(entries, &claimed));

        debug!(
            "Mined batch of {}: {} patterns touched",
            entries.len(),
            touched.len()
        );
        touched
    }

    /// Dynamic discovery over unclaimed ERROR/CRITICAL entries
    fn discover(&self, entries: &[LogEntry], claimed: &[bool]) -> Vec<LogPattern> {
        let candidates: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(i, e)| !claimed[*i] && e.level.is_error())
            .map(|(i, _)| i)
            .collect();

        if candidates.len() < self.config.min_cluster_entries {
            return Vec::new();
        }

        let docs: Vec<Vec<String>> = candidates
            .iter()
            .map(|&i| cluster::tokenize(&entries[i].message))
            .collect();
        let (vocab, vectors) = cluster::vectorize(&docs);
        let assignment = cluster::dbscan(
            &vectors,
            self.config.cluster_eps,
            self.config.cluster_min_pts,
        );

        let mut clusters: HashMap<usize, Vec<usize>> = HashMap::new();
        for (slot, cluster_id) in assignment.iter().enumerate() {
            if let Some(id) = cluster_id {
                clusters.entry(*id).or_default().push(candidates[slot]);
            }
        }

        let mut discovered = Vec::new();
        let mut cluster_ids: Vec<usize> = clusters.keys().copied().collect();
        cluster_ids.sort_unstable();

        for id in cluster_ids {
            let members = &clusters[&id];
            let member_slots: Vec<usize> = assignment
                .iter()
                .enumerate()
                .filter(|(_, c)| **c == Some(id))
                .map(|(slot, _)| slot)
                .collect();

            let terms = dominant_terms(&vocab, &vectors, &member_slots);
            let pattern_id = format!("cluster_{:08x}", stable_id(&terms) as u32);
            let description = format!("recurring error cluster: {}", terms.join(", "));

            let critical = members
                .iter()
                .filter(|&&i| entries[i].level == crate::entry::LogLevel::Critical)
                .count();
            let severity = if critical * 2 >= members.len() {
                PatternSeverity::Critical
            } else {
                PatternSeverity::High
            };

            if let Some(pattern) =
                self.upsert(&pattern_id, &description, severity, entries, members)
            {
                discovered.push(pattern);
            }
        }
        discovered
    }

    /// Upsert one pattern for this batch's hits. New ids must clear
    /// `min_frequency` within the batch; known ids always accumulate.
    fn upsert(
        &self,
        pattern_id: &str,
        description: &str,
        severity: PatternSeverity,
        entries: &[LogEntry],
        hits: &[usize],
    ) -> Option<LogPattern> {
        let mut known = self
            .known
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let batch_first = hits.iter().map(|&i| entries[i].timestamp).min()?;
        let batch_last = hits.iter().map(|&i| entries[i].timestamp).max()?;

        if let Some(existing) = known.get_mut(pattern_id) {
            existing.frequency += hits.len() as u64;
            existing.last_seen = existing.last_seen.max(batch_last);
            existing.severity = existing.severity.max(severity);
            for &i in hits {
                if existing.examples.len() >= EXAMPLE_CAP {
                    break;
                }
                if !existing.examples.contains(&entries[i].message) {
                    existing.examples.push(entries[i].message.clone());
                }
            }
            return Some(existing.clone());
        }

        if hits.len() < self.config.min_frequency {
            return None;
        }

        let pattern = LogPattern {
            pattern_id: pattern_id.to_string(),
            description: description.to_string(),
            frequency: hits.len() as u64,
            first_seen: batch_first,
            last_seen: batch_last,
            severity,
            examples: hits
                .iter()
                .take(EXAMPLE_CAP)
                .map(|&i| entries[i].message.clone())
                .collect(),
        };
        known.insert(pattern_id.to_string(), pattern.clone());
        Some(pattern)
    }

    /// All known patterns, sorted by descending frequency
    pub fn patterns(&self) -> Vec<LogPattern> {
        let known = self
            .known
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut all: Vec<LogPattern> = known.values().cloned().collect();
        all.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        all
    }

    /// Operator hint for a fixed-matcher pattern id
    pub fn recommendation(&self, pattern_id: &str) -> Option<&'static str> {
        self.matchers
            .iter()
            .find(|m| m.name == pattern_id)
            .map(|m| m.recommendation)
    }

    /// Restore a persisted pattern into the upsert store
    pub fn restore(&self, pattern: LogPattern) {
        let mut known = self
            .known
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        known.insert(pattern.pattern_id.clone(), pattern);
    }
}

impl Default for PatternMiner {
    fn default() -> Self {
        Self::new(MinerConfig::default())
    }
}

/// Share of ERROR/CRITICAL entries among the hits
fn error_ratio(entries: &[LogEntry], hits: &[usize]) -> f64 {
    if hits.is_empty() {
        return 0.0;
    }
    let errors = hits.iter().filter(|&&i| entries[i].level.is_error()).count();
    errors as f64 / hits.len() as f64
}

fn severity_from_error_ratio(ratio: f64) -> PatternSeverity {
    if ratio >= 0.9 {
        PatternSeverity::Critical
    } else if ratio >= 0.5 {
        PatternSeverity::High
    } else if ratio >= 0.25 {
        PatternSeverity::Medium
    } else {
        PatternSeverity::Low
    }
}

/// Top three vocabulary terms across a cluster, by summed weight
fn dominant_terms(vocab: &[String], vectors: &[Vec<f64>], member_slots: &[usize]) -> Vec<String> {
    let mut weights = vec![0.0; vocab.len()];
    for &slot in member_slots {
        for (i, w) in vectors[slot].iter().enumerate() {
            weights[i] += w;
        }
    }
    let mut ranked: Vec<(usize, f64)> = weights.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| vocab[a.0].cmp(&vocab[b.0]))
    });
    ranked
        .into_iter()
        .take(3)
        .filter(|(_, w)| *w > 0.0)
        .map(|(i, _)| vocab[i].clone())
        .collect()
}

/// FNV-1a over the dominant terms; stable across batches that surface
/// the same cluster vocabulary
fn stable_id(terms: &[String]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for term in terms {
        for b in term.as_bytes() {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash ^= 0x1f;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::LogLevel;

    fn entry(level: LogLevel, message: &str) -> LogEntry {
        LogEntry::now(level, "api", message)
    }

    #[test]
    fn test_below_min_frequency_is_silent() {
        let miner = PatternMiner::default();
        let batch = vec![
            entry(LogLevel::Error, "request timed out after 30s"),
            entry(LogLevel::Error, "request timed out after 31s"),
        ];

        let touched = miner.mine(&batch);
        assert!(touched.iter().all(|p| p.pattern_id != "timeout"));
    }

    #[test]
    fn test_third_match_emits_pattern_with_frequency_three() {
        let miner = PatternMiner::default();
        let batch = vec![
            entry(LogLevel::Error, "request timed out after 30s"),
            entry(LogLevel::Error, "request timed out after 31s"),
            entry(LogLevel::Error, "upstream deadline exceeded"),
        ];

        let touched = miner.mine(&batch);
        let timeout: Vec<_> = touched.iter().filter(|p| p.pattern_id == "timeout").collect();
        assert_eq!(timeout.len(), 1);
        assert_eq!(timeout[0].frequency, 3);
        assert_eq!(timeout[0].severity, PatternSeverity::Critical);
    }

    #[test]
    fn test_known_pattern_accumulates_across_batches() {
        let miner = PatternMiner::default();
        let batch: Vec<LogEntry> = (0..3)
            .map(|i| entry(LogLevel::Error, &format!("query {} timed out", i)))
            .collect();

        miner.mine(&batch);
        // A later batch below min_frequency still bumps the known pattern.
        let touched = miner.mine(&[entry(LogLevel::Warn, "connect timed out")]);

        let timeout = touched.iter().find(|p| p.pattern_id == "timeout").unwrap();
        assert_eq!(timeout.frequency, 4);
    }

    #[test]
    fn test_forced_critical_overrides_level_mix() {
        let miner = PatternMiner::default();
        let batch: Vec<LogEntry> = (0..3)
            .map(|i| entry(LogLevel::Info, &format!("disk full on volume {}", i)))
            .collect();

        let touched = miner.mine(&batch);
        let disk = touched.iter().find(|p| p.pattern_id == "disk_full").unwrap();
        assert_eq!(disk.severity, PatternSeverity::Critical);
    }

    #[test]
    fn test_examples_capped_at_five() {
        let miner = PatternMiner::default();
        let batch: Vec<LogEntry> = (0..9)
            .map(|i| entry(LogLevel::Error, &format!("shard {} timed out", i)))
            .collect();

        let touched = miner.mine(&batch);
        let timeout = touched.iter().find(|p| p.pattern_id == "timeout").unwrap();
        assert_eq!(timeout.examples.len(), 5);
        assert_eq!(timeout.frequency, 9);
    }

    #[test]
    fn test_dynamic_discovery_of_unmatched_errors() {
        let miner = PatternMiner::default();
        let mut batch: Vec<LogEntry> = (0..6)
            .map(|i| {
                entry(
                    LogLevel::Error,
                    &format!("payment provider declined transaction {}", i),
                )
            })
            .collect();
        batch.push(entry(LogLevel::Info, "heartbeat ok"));

        let touched = miner.mine(&batch);
        let dynamic: Vec<_> = touched
            .iter()
            .filter(|p| p.pattern_id.starts_with("cluster_"))
            .collect();
        assert_eq!(dynamic.len(), 1);
        assert_eq!(dynamic[0].frequency, 6);
        assert!(dynamic[0].examples.len() <= 5);
    }

    #[test]
    fn test_dynamic_discovery_needs_five_candidates() {
        let miner = PatternMiner::default();
        let batch: Vec<LogEntry> = (0..4)
            .map(|i| entry(LogLevel::Error, &format!("odd failure in stage {}", i)))
            .collect();

        let touched = miner.mine(&batch);
        assert!(touched.iter().all(|p| !p.pattern_id.starts_with("cluster_")));
    }

    #[test]
    fn test_claimed_entries_excluded_from_discovery() {
        let miner = PatternMiner::default();
        // All entries match the timeout matcher, so clustering sees nothing.
        let batch: Vec<LogEntry> = (0..6)
            .map(|i| entry(LogLevel::Error, &format!("call {} timed out", i)))
            .collect();

        let touched = miner.mine(&batch);
        assert!(touched.iter().all(|p| !p.pattern_id.starts_with("cluster_")));
    }
}
