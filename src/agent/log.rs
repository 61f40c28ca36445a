//! Per-run log kept alongside `tracing` output.
//!
//! Entries are returned in the run outcome and mirrored onto the event stream
//! so observers can render a live feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Log level enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    /// Get display string for the log level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// A single log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Iteration the entry was written in (0 before the first iteration).
    pub iteration: u32,
}

impl LogEntry {
    /// Create a new log entry.
    pub fn new(level: LogLevel, message: impl Into<String>, iteration: u32) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            iteration,
        }
    }

    /// Format the entry as a single line.
    pub fn format_line(&self) -> String {
        format!(
            "[{}] [{}] #{} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level.as_str(),
            self.iteration,
            self.message
        )
    }
}

/// Ordered log for one run.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    entries: Vec<LogEntry>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and forward it to `tracing`.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>, iteration: u32) -> LogEntry {
        let entry = LogEntry::new(level, message, iteration);
        match level {
            LogLevel::Info | LogLevel::Success => tracing::info!(iteration, "{}", entry.message),
            LogLevel::Warning => tracing::warn!(iteration, "{}", entry.message),
            LogLevel::Error => tracing::error!(iteration, "{}", entry.message),
        }
        self.entries.push(entry.clone());
        entry
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn format_all(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.format_line())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_log_keeps_order() {
        let mut log = RunLog::new();
        log.log(LogLevel::Info, "first", 0);
        log.log(LogLevel::Warning, "second", 1);

        let messages: Vec<&str> = log.entries().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert!(log.format_all().contains("[WARN] #1 second"));

        log.clear();
        assert!(log.entries().is_empty());
    }
}
