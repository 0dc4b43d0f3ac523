//! Append-only connection diagnostics.
//!
//! Every lifecycle step and failure is recorded here before the state machine
//! acts on it, and mirrored to `tracing` so the same trail shows up in logs.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default number of retained entries.
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 1000;

/// Entry severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine progress
    Info,
    /// A step completed
    Success,
    /// Recoverable problem
    Warn,
    /// Failure
    Error,
}

impl Severity {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// One diagnostics record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEntry {
    /// Unix milliseconds
    pub timestamp_ms: u64,
    /// Severity tag
    pub severity: Severity,
    /// Free-form message
    pub message: String,
}

/// Bounded, ordered diagnostics trail.
///
/// With a capacity, the oldest entry is evicted once the log is full. Entries
/// are never modified after being appended.
#[derive(Debug, Clone)]
pub struct DiagnosticsLog {
    entries: VecDeque<DiagnosticEntry>,
    capacity: Option<usize>,
}

impl Default for DiagnosticsLog {
    fn default() -> Self {
        Self::with_capacity(Some(DEFAULT_DIAGNOSTICS_CAPACITY))
    }
}

impl DiagnosticsLog {
    /// Log retaining at most `capacity` entries (`None` keeps everything).
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self { entries: VecDeque::new(), capacity }
    }

    /// Append an entry and mirror it to `tracing`.
    pub fn push(&mut self, timestamp_ms: u64, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Info => tracing::info!(target: "clawlink::diagnostics", "{message}"),
            Severity::Success => {
                tracing::info!(target: "clawlink::diagnostics", outcome = "success", "{message}");
            },
            Severity::Warn => tracing::warn!(target: "clawlink::diagnostics", "{message}"),
            Severity::Error => tracing::error!(target: "clawlink::diagnostics", "{message}"),
        }

        if self.capacity == Some(0) {
            return;
        }
        if let Some(capacity) = self.capacity
            && self.entries.len() >= capacity
        {
            self.entries.pop_front();
        }
        self.entries.push_back(DiagnosticEntry { timestamp_ms, severity, message });
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &DiagnosticEntry> {
        self.entries.iter()
    }

    /// Owned copy of all entries, oldest first.
    pub fn snapshot(&self) -> Vec<DiagnosticEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Most recent error entry.
    pub fn latest_error(&self) -> Option<&DiagnosticEntry> {
        self.entries.iter().rev().find(|entry| entry.severity == Severity::Error)
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_order() {
        let mut log = DiagnosticsLog::default();
        log.push(1, Severity::Info, "connecting");
        log.push(2, Severity::Success, "connected");
        log.push(3, Severity::Warn, "slow");

        let messages: Vec<_> = log.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["connecting", "connected", "slow"]);
        assert_eq!(log.entries().map(|e| e.timestamp_ms).collect::<Vec<_>>(), [1, 2, 3]);
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut log = DiagnosticsLog::with_capacity(Some(2));
        log.push(1, Severity::Info, "a");
        log.push(2, Severity::Info, "b");
        log.push(3, Severity::Info, "c");

        let messages: Vec<_> = log.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["b", "c"]);
    }

    #[test]
    fn unbounded_keeps_everything() {
        let mut log = DiagnosticsLog::with_capacity(None);
        for i in 0..2_000 {
            log.push(i, Severity::Info, "x");
        }
        assert_eq!(log.len(), 2_000);
    }

    #[test]
    fn latest_error_is_most_recent() {
        let mut log = DiagnosticsLog::default();
        assert!(log.latest_error().is_none());

        log.push(1, Severity::Error, "first");
        log.push(2, Severity::Info, "ok");
        log.push(3, Severity::Error, "second");
        log.push(4, Severity::Success, "recovered");

        assert_eq!(log.latest_error().unwrap().message, "second");
    }

    #[test]
    fn severity_serializes_lowercase() {
        let entry = DiagnosticEntry { timestamp_ms: 5, severity: Severity::Success, message: "m".into() };
        assert_eq!(
            serde_json::to_value(entry).unwrap(),
            serde_json::json!({ "timestampMs": 5, "severity": "success", "message": "m" })
        );
    }
}
