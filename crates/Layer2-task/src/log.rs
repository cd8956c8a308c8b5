//! Task Log - bounded per-task output history
//!
//! Every completed line a task produces (stdout, stderr, captured log
//! records) and the runtime's own system notices land here. The buffer
//! keeps the most recent `capacity` entries; the oldest drop first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of lines kept per task
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Origin of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
    /// Record captured from the logging facade
    Log,
    /// Runtime notices (forced stop, etc.)
    System,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Stdout => "stdout",
            LogLevel::Stderr => "stderr",
            LogLevel::Log => "log",
            LogLevel::System => "system",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Stderr)
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,

    pub level: LogLevel,

    pub content: String,

    /// Line number within the current run (1-based)
    pub line_number: usize,
}

impl LogEntry {
    pub fn new(level: LogLevel, content: impl Into<String>, line_number: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            content: content.into(),
            line_number,
        }
    }

    /// `[HH:MM:SS.mmm] [level] content`
    pub fn format_line(&self) -> String {
        format!(
            "[{}] [{}] {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level.as_str(),
            self.content
        )
    }
}

/// Log buffer for a single task
#[derive(Debug)]
pub struct TaskLogBuffer {
    entries: VecDeque<LogEntry>,

    capacity: usize,

    /// Lines pushed since the last clear, including evicted ones
    line_count: usize,
}

impl Default for TaskLogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl TaskLogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity,
            line_count: 0,
        }
    }

    /// Append a line, evicting the oldest entry when full
    pub fn push(&mut self, level: LogLevel, content: impl Into<String>) -> LogEntry {
        self.line_count += 1;
        let entry = LogEntry::new(level, content, self.line_count);

        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());
        entry
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.line_count = 0;
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Contents of every retained entry, oldest first
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.content.clone()).collect()
    }

    /// Get last N entries
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn errors(&self) -> Vec<&LogEntry> {
        self.entries.iter().filter(|e| e.level.is_error()).collect()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }
}
