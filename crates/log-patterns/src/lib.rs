//! Log Pattern Mining
//!
//! Two-pass mining over parsed log batches: a registry of fixed
//! regular-expression matchers for known failure categories, then
//! TF-IDF + density clustering over the error text nothing claimed.

mod analysis;
mod cluster;
mod entry;
mod matchers;
mod miner;

pub use analysis::{LogAnalysis, LogAnomaly};
pub use entry::{LogEntry, LogLevel};
pub use matchers::{FixedMatcher, default_matchers};
pub use miner::{LogPattern, MinerConfig, PatternMiner, PatternSeverity};
