//! Bounded operator-facing event log.
//!
//! Entries are human-readable lines stamped with local time. The log is
//! append-only from the core's point of view; presentation layers read the
//! tail or filter it.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// A single timestamped log line
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// Ring of the most recent `capacity` entries, oldest evicted first
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a line stamped with the current time
    pub fn push(&mut self, message: impl Into<String>) {
        self.push_at(Local::now(), message);
    }

    /// Append a line with an explicit timestamp
    pub fn push_at(&mut self, at: DateTime<Local>, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            at,
            message: message.into(),
        });
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

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Last `n` entries rendered as lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).map(ToString::to_string).collect()
    }

    /// Rendered lines containing `needle`, case-insensitive
    ///
    /// An empty needle matches everything.
    pub fn filter(&self, needle: &str) -> Vec<String> {
        let needle = needle.to_lowercase();
        self.entries
            .iter()
            .map(ToString::to_string)
            .filter(|line| needle.is_empty() || line.to_lowercase().contains(&needle))
            .collect()
    }

    /// Most recent entry, if any
    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut log = EventLog::new(3);
        for i in 0..5 {
            log.push(format!("line {}", i));
        }
        assert_eq!(log.len(), 3);
        let messages: Vec<_> = log.entries().map(|e| e.message.clone()).collect();
        assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn tail_returns_newest_in_order() {
        let mut log = EventLog::new(10);
        log.push("a");
        log.push("b");
        log.push("c");
        let tail = log.tail(2);
        assert_eq!(tail.len(), 2);
        assert!(tail[0].ends_with("] b"));
        assert!(tail[1].ends_with("] c"));
        assert_eq!(log.tail(50).len(), 3);
    }

    #[test]
    fn filter_is_case_insensitive() {
        let mut log = EventLog::new(10);
        log.push("Alarm raised: OVERTEMP");
        log.push("Connected to COM4");
        assert_eq!(log.filter("overtemp").len(), 1);
        assert_eq!(log.filter("").len(), 2);
        assert!(log.filter("missing").is_empty());
    }

    #[test]
    fn renders_with_time_prefix() {
        let mut log = EventLog::new(2);
        log.push("hello");
        let line = log.last().unwrap().to_string();
        assert!(line.starts_with('['));
        assert!(line.ends_with("] hello"));
    }
}
