//! Traffic and log relays.

use serde::{Deserialize, Serialize};

/// One bandwidth sample reported by the relay service
///
/// Rates are bytes per second, totals are bytes since the service started.
/// Values are forwarded exactly as the service reported them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSample {
    /// Upload rate
    pub upload: i64,
    /// Download rate
    pub download: i64,
    /// Total bytes written
    pub written: i64,
    /// Total bytes read
    pub read: i64,
}

impl TrafficSample {
    pub fn new(upload: i64, download: i64, written: i64, read: i64) -> Self {
        Self {
            upload,
            download,
            written,
            read,
        }
    }

    /// Format as a one-line summary in kB
    pub fn format(&self) -> String {
        format!(
            "↑ {}kB ({}kB/s)  ↓ {}kB ({}kB/s)",
            self.written / 1000,
            self.upload / 1000,
            self.read / 1000,
            self.download / 1000
        )
    }
}

/// Line separator in the accumulated log
pub const LOG_SEPARATOR: char = '\n';

/// Most-recent-first log history
///
/// Grows without bound for the lifetime of the controller.
#[derive(Debug, Default, Clone)]
pub struct LogRelay {
    history: String,
}

impl LogRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend a line
    pub fn push(&mut self, line: &str) {
        let mut next = String::with_capacity(line.len() + 1 + self.history.len());
        next.push_str(line);
        next.push(LOG_SEPARATOR);
        next.push_str(&self.history);
        self.history = next;
    }

    /// Full accumulated text
    pub fn history(&self) -> &str {
        &self.history
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
