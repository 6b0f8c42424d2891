//! Threshold Engine
//!
//! Maintains one adaptive threshold per registered metric. Recomputes
//! blend statistical, trend, and model-based candidates, then clamp the
//! result into the configured bounds. Every change lands in an
//! append-only audit history.

mod manager;
mod stats;

pub use manager::{
    ThresholdChange, ThresholdConfig, ThresholdError, ThresholdManager, RECOMPUTE_INTERVAL_SECS,
};
pub use stats::{mean, median, slope, stddev};
