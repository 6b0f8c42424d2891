//! Escalation Scheduler
//!
//! A fixed-tick background loop over the alert engine: advances
//! escalation ladders, force-resolves alerts past the age horizon, and
//! re-notifies escalated alerts. Each iteration is isolated; a failure
//! is logged and the next tick proceeds.

mod scheduler;

pub use scheduler::{EscalationScheduler, SchedulerConfig};
