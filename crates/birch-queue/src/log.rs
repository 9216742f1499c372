//! Queue log entries and the bounded log history.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Scan id used for entries that concern the queue itself.
pub const QUEUE_LOG_ID: &str = "queue";

/// Default number of retained log entries.
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal progress.
    Info,
    /// Something unexpected that did not fail a scan.
    Warning,
    /// A failure.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        })
    }
}

/// A structured log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Local time the entry was generated.
    pub timestamp: DateTime<Local>,
    /// Scan id, or [`QUEUE_LOG_ID`].
    pub scan_id: String,
    /// Scan name, or the queue id for queue entries.
    pub scan_name: String,
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            self.scan_name,
            self.message
        )
    }
}

/// Filter for [`LogHistory::query`].
///
/// ```rust,ignore
/// let errors = queue.logs(&LogQuery::new().scan("proj_s1").level(LogLevel::Error).limit(10));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    /// Only entries of this scan.
    pub scan_id: Option<String>,
    /// Only entries of this level.
    pub level: Option<LogLevel>,
    /// Only the last N matching entries.
    pub limit: Option<usize>,
}

impl LogQuery {
    /// Match everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one scan id.
    pub fn scan(mut self, scan_id: impl Into<String>) -> Self {
        self.scan_id = Some(scan_id.into());
        self
    }

    /// Restrict to one level.
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    /// Keep only the last `limit` matches.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &LogEntry) -> bool {
        self.scan_id.as_deref().map_or(true, |id| entry.scan_id == id)
            && self.level.map_or(true, |level| entry.level == level)
    }
}

/// Ring buffer of log entries; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct LogHistory {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogHistory {
    /// Empty history holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest when full.
    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Matching entries, oldest first.
    pub fn query(&self, query: &LogQuery) -> Vec<LogEntry> {
        let mut matched: Vec<LogEntry> = self
            .entries
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for LogHistory {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(scan_id: &str, level: LogLevel, message: &str) -> LogEntry {
        LogEntry {
            timestamp: Local::now(),
            scan_id: scan_id.to_string(),
            scan_name: scan_id.to_string(),
            level,
            message: message.to_string(),
            data: None,
        }
    }

    #[test]
    fn test_display_format() {
        let mut e = entry("proj_s1", LogLevel::Warning, "Scan aborted");
        e.scan_name = "s1".to_string();
        e.timestamp = Local.with_ymd_and_hms(2024, 5, 1, 9, 7, 3).unwrap();
        assert_eq!(e.to_string(), "[09:07:03] [WARNING] [s1] Scan aborted");
    }

    #[test]
    fn test_oldest_evicted_first() {
        let mut history = LogHistory::new(3);
        for i in 0..5 {
            history.push(entry("a", LogLevel::Info, &i.to_string()));
        }
        let messages: Vec<_> = history
            .query(&LogQuery::new())
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_filters_keep_order() {
        let mut history = LogHistory::default();
        history.push(entry("a", LogLevel::Info, "1"));
        history.push(entry("b", LogLevel::Info, "2"));
        history.push(entry("a", LogLevel::Error, "3"));
        history.push(entry("a", LogLevel::Info, "4"));

        let by_scan: Vec<_> = history
            .query(&LogQuery::new().scan("a"))
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(by_scan, vec!["1", "3", "4"]);

        let errors = history.query(&LogQuery::new().level(LogLevel::Error));
        assert_eq!(errors.len(), 1);

        let tail: Vec<_> = history
            .query(&LogQuery::new().scan("a").limit(2))
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(tail, vec!["3", "4"]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut history = LogHistory::new(0);
        history.push(entry("a", LogLevel::Info, "only"));
        assert_eq!(history.len(), 1);
        assert_eq!(history.capacity(), 1);
    }
}
