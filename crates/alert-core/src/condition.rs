//! Typed Rule Conditions
//!
//! Conditions are a small expression tree rather than host-language
//! expressions: comparisons over metric references, threshold lookups,
//! and literals, combined with all/any/not. Evaluation sees only the
//! tick's metric bindings and the threshold accessor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Condition evaluation failures; callers treat these as `false`
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("metric not bound: {0}")]
    UnknownMetric(String),

    #[error("threshold not registered: {0}")]
    UnknownThreshold(String),
}

/// Read access to current thresholds during evaluation
pub trait ThresholdSource {
    fn threshold(&self, name: &str) -> Option<f64>;
}

/// Thresholds resolved from a plain map (tests, snapshots)
impl ThresholdSource for HashMap<String, f64> {
    fn threshold(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

/// A value reference inside a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Literal(f64),
    /// Current value of a metric binding
    Metric(String),
    /// Current adaptive threshold of a metric
    Threshold(String),
}

impl Operand {
    fn resolve(
        &self,
        metrics: &HashMap<String, f64>,
        thresholds: &dyn ThresholdSource,
    ) -> Result<f64, EvalError> {
        match self {
            Operand::Literal(v) => Ok(*v),
            Operand::Metric(name) => metrics
                .get(name)
                .copied()
                .ok_or_else(|| EvalError::UnknownMetric(name.clone())),
            Operand::Threshold(name) => thresholds
                .threshold(name)
                .ok_or_else(|| EvalError::UnknownThreshold(name.clone())),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(v) => write!(f, "{}", v),
            Operand::Metric(name) => write!(f, "{}", name),
            Operand::Threshold(name) => write!(f, "threshold({})", name),
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Eq => (lhs - rhs).abs() < 1e-9,
            CmpOp::Ne => (lhs - rhs).abs() >= 1e-9,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        };
        write!(f, "{}", s)
    }
}

/// A boolean expression over metric bindings and threshold lookups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Compare {
        lhs: Operand,
        op: CmpOp,
        rhs: Operand,
    },
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// Shorthand: `metric > threshold(metric)`
    pub fn metric_over_threshold(name: &str) -> Self {
        Condition::Compare {
            lhs: Operand::Metric(name.to_string()),
            op: CmpOp::Gt,
            rhs: Operand::Threshold(name.to_string()),
        }
    }

    /// Shorthand: `metric <op> literal`
    pub fn metric(name: &str, op: CmpOp, value: f64) -> Self {
        Condition::Compare {
            lhs: Operand::Metric(name.to_string()),
            op,
            rhs: Operand::Literal(value),
        }
    }

    /// Evaluate against the tick's bindings. Errors propagate so the
    /// caller can log and fail safe.
    pub fn evaluate(
        &self,
        metrics: &HashMap<String, f64>,
        thresholds: &dyn ThresholdSource,
    ) -> Result<bool, EvalError> {
        match self {
            Condition::Compare { lhs, op, rhs } => {
                let l = lhs.resolve(metrics, thresholds)?;
                let r = rhs.resolve(metrics, thresholds)?;
                Ok(op.apply(l, r))
            }
            Condition::All(children) => {
                for child in children {
                    if !child.evaluate(metrics, thresholds)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any(children) => {
                for child in children {
                    if child.evaluate(metrics, thresholds)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not(child) => Ok(!child.evaluate(metrics, thresholds)?),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Compare { lhs, op, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
            Condition::All(children) => {
                let parts: Vec<String> = children.iter().map(|c| c.to_string()).collect();
                write!(f, "({})", parts.join(" and "))
            }
            Condition::Any(children) => {
                let parts: Vec<String> = children.iter().map(|c| c.to_string()).collect();
                write!(f, "({})", parts.join(" or "))
            }
            Condition::Not(child) => write!(f, "not {}", child),
        }
    }
}
