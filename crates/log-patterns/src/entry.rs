//! Parsed Log Entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Log severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    /// Parse common level spellings; unknown levels default to Info
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "TRACE" => LogLevel::Trace,
            "DEBUG" => LogLevel::Debug,
            "INFO" => LogLevel::Info,
            "WARN" | "WARNING" => LogLevel::Warn,
            "ERROR" | "ERR" => LogLevel::Error,
            "CRITICAL" | "CRIT" | "FATAL" => LogLevel::Critical,
            _ => LogLevel::Info,
        }
    }

    /// ERROR or CRITICAL
    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Critical)
    }
}

/// One parsed log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Emitting component
    pub source: String,
    pub message: String,
}

impl LogEntry {
    /// Create an entry stamped with the current time
    pub fn now(level: LogLevel, source: &str, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            source: source.to_string(),
            message: message.to_string(),
        }
    }
}
