//! Structured logger shared by the coordinator and its agents.
//!
//! One [`Logger`] is built per coordinator and handed to every agent as an
//! `Arc<Logger>`. Entries below the configured level are dropped. Accepted
//! entries are kept in a bounded ring buffer, forwarded to `tracing` when the
//! console sink is enabled, and appended as JSON lines to the file sink if one
//! is configured.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of entries kept in memory.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Default,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accepted log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Emitting component, e.g. `coordinator` or an agent name.
    pub component: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Sinks and limits for a [`Logger`].
#[derive(Debug, Clone)]
pub struct LoggerOptions {
    pub level: LogLevel,
    pub buffer_capacity: usize,
    pub console: bool,
    pub file: Option<PathBuf>,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            console: true,
            file: None,
        }
    }
}

pub struct Logger {
    level: LogLevel,
    capacity: usize,
    console: bool,
    buffer: Mutex<VecDeque<LogEntry>>,
    file: Option<Mutex<File>>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level)
            .field("capacity", &self.capacity)
            .field("console", &self.console)
            .field("file", &self.file.is_some())
            .finish()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LoggerOptions::default())
    }
}

impl Logger {
    /// Create a logger. A file sink that cannot be opened is reported via
    /// `tracing` and skipped; the logger still works in memory.
    pub fn new(options: LoggerOptions) -> Self {
        let file = options.file.as_deref().and_then(|path| match open_log_file(path) {
            Ok(file) => Some(Mutex::new(file)),
            Err(e) => {
                tracing::warn!("Failed to open log file {}: {}", path.display(), e);
                None
            }
        });

        Self {
            level: options.level,
            capacity: options.buffer_capacity.max(1),
            console: options.console,
            buffer: Mutex::new(VecDeque::new()),
            file,
        }
    }

    /// In-memory logger with no console or file output.
    pub fn silent(level: LogLevel) -> Self {
        Self::new(LoggerOptions {
            level,
            console: false,
            ..LoggerOptions::default()
        })
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level
    }

    pub fn debug(&self, component: &str, message: impl Into<String>) {
        self.log(LogLevel::Debug, component, message, None);
    }

    pub fn info(&self, component: &str, message: impl Into<String>) {
        self.log(LogLevel::Info, component, message, None);
    }

    pub fn warn(&self, component: &str, message: impl Into<String>) {
        self.log(LogLevel::Warn, component, message, None);
    }

    pub fn error(&self, component: &str, message: impl Into<String>) {
        self.log(LogLevel::Error, component, message, None);
    }

    /// Record an entry with a structured payload.
    pub fn log(
        &self,
        level: LogLevel,
        component: &str,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) {
        if !self.enabled(level) {
            return;
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            component: component.to_string(),
            message: message.into(),
            data,
        };

        if self.console {
            forward_to_tracing(&entry);
        }

        if let Some(file) = &self.file {
            if let Ok(line) = serde_json::to_string(&entry) {
                if let Ok(mut file) = file.lock() {
                    // The ring buffer still holds the entry if the write fails.
                    let _ = writeln!(file, "{}", line);
                }
            }
        }

        if let Ok(mut buffer) = self.buffer.lock() {
            if buffer.len() == self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(entry);
        }
    }

    /// Up to `limit` most recent entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let Ok(buffer) = self.buffer.lock() else {
            return Vec::new();
        };
        let skip = buffer.len().saturating_sub(limit);
        buffer.iter().skip(skip).cloned().collect()
    }

    /// Buffered entries at or above `level`.
    pub fn entries_at_least(&self, level: LogLevel) -> Vec<LogEntry> {
        let Ok(buffer) = self.buffer.lock() else {
            return Vec::new();
        };
        buffer.iter().filter(|e| e.level >= level).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
    }
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn forward_to_tracing(entry: &LogEntry) {
    let component = entry.component.as_str();
    let data = entry.data.as_ref().map(|d| d.to_string()).unwrap_or_default();
    match entry.level {
        LogLevel::Debug => tracing::debug!(component, data = %data, "{}", entry.message),
        LogLevel::Info => tracing::info!(component, data = %data, "{}", entry.message),
        LogLevel::Warn => tracing::warn!(component, data = %data, "{}", entry.message),
        LogLevel::Error => tracing::error!(component, data = %data, "{}", entry.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_level_filtering() {
        let logger = Logger::silent(LogLevel::Warn);
        logger.debug("test", "dropped");
        logger.info("test", "dropped");
        logger.warn("test", "kept");
        logger.error("test", "kept too");

        let entries = logger.recent(10);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Warn);
        assert_eq!(entries[1].message, "kept too");
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let logger = Logger::new(LoggerOptions {
            level: LogLevel::Debug,
            buffer_capacity: 3,
            console: false,
            file: None,
        });
        for i in 0..5 {
            logger.info("test", format!("entry {}", i));
        }

        let entries = logger.recent(10);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "entry 2");
        assert_eq!(entries[2].message, "entry 4");
    }

    #[test]
    fn test_recent_limit_returns_newest() {
        let logger = Logger::silent(LogLevel::Debug);
        for i in 0..4 {
            logger.debug("test", format!("{}", i));
        }
        let entries = logger.recent(2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "2");
        assert_eq!(entries[1].message, "3");
    }

    #[test]
    fn test_entries_at_least() {
        let logger = Logger::silent(LogLevel::Debug);
        logger.debug("a", "d");
        logger.error("b", "e");
        let errors = logger.entries_at_least(LogLevel::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].component, "b");
    }

    #[test]
    fn test_file_sink_writes_json_lines() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("logs/diagnostics.log");
        let logger = Logger::new(LoggerOptions {
            level: LogLevel::Info,
            buffer_capacity: 10,
            console: false,
            file: Some(path.clone()),
        });
        logger.log(
            LogLevel::Info,
            "coordinator",
            "scan complete",
            Some(json!({"issues": 3})),
        );
        drop(logger);

        let contents = std::fs::read_to_string(&path).unwrap();
        let line = contents.lines().next().unwrap();
        let entry: LogEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.component, "coordinator");
        assert_eq!(entry.data, Some(json!({"issues": 3})));
    }

    #[test]
    fn test_clear() {
        let logger = Logger::silent(LogLevel::Debug);
        logger.info("x", "y");
        assert!(!logger.is_empty());
        logger.clear();
        assert!(logger.is_empty());
    }
}
