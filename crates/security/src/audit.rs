//! Audit logging: structured record of tool runs and change decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    pub actor: String,
    pub target: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Tool was executed
    ToolExecution { tool_name: String },
    /// Tool call refused by policy or argument limits
    ToolDenied { tool_name: String },
    /// Path access was denied
    PathDenied { path: String },
    /// A staged change was written to disk
    PendingApplied { path: String },
    /// A staged change was discarded
    PendingRejected { path: String },
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Trait for audit log sinks (where events are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// In-memory audit logger that keeps entries and forwards them to sinks.
pub struct AuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// Create a new audit logger with no sinks.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sinks: Vec::new(),
        }
    }

    /// Create a new audit logger with the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sinks,
        }
    }

    /// Logger that mirrors every entry to `tracing`.
    pub fn tracing() -> Self {
        Self::with_sinks(vec![Box::new(TracingSink)])
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an audit event.
    pub fn log(
        &self,
        event: AuditEvent,
        actor: &str,
        target: &str,
        outcome: AuditOutcome,
        details: Option<String>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            target: target.into(),
            outcome,
            details,
        };

        self.lock().push(entry.clone());

        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    /// Get all recorded entries.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().clone()
    }

    /// Get entries filtered by outcome.
    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| &e.outcome == outcome)
            .cloned()
            .collect()
    }

    /// Count of stored entries.
    pub fn count(&self) -> usize {
        self.lock().len()
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = ?entry.event,
            actor = %entry.actor,
            target = %entry.target,
            outcome = ?entry.outcome,
            details = ?entry.details,
            "AUDIT"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn log_and_retrieve_entries() {
        let logger = AuditLogger::new();
        logger.log(
            AuditEvent::ToolExecution { tool_name: "GREP".into() },
            "session-1",
            "src",
            AuditOutcome::Success,
            None,
        );
        logger.log(
            AuditEvent::PathDenied { path: "../etc".into() },
            "session-1",
            "../etc",
            AuditOutcome::Denied,
            Some("outside workspace".into()),
        );

        assert_eq!(logger.count(), 2);
        let entries = logger.entries();
        assert_eq!(entries[0].target, "src");
        assert_eq!(entries[1].outcome, AuditOutcome::Denied);
    }

    #[test]
    fn filter_by_outcome() {
        let logger = AuditLogger::new();
        logger.log(
            AuditEvent::PendingApplied { path: "a.py".into() },
            "cli",
            "a.py",
            AuditOutcome::Success,
            None,
        );
        logger.log(
            AuditEvent::PendingRejected { path: "b.py".into() },
            "cli",
            "b.py",
            AuditOutcome::Failure,
            None,
        );
        assert_eq!(logger.entries_by_outcome(&AuditOutcome::Success).len(), 1);
    }

    struct CountingSink(Arc<Mutex<usize>>);

    impl AuditSink for CountingSink {
        fn record(&self, _entry: &AuditEntry) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn entries_forwarded_to_sinks() {
        let hits = Arc::new(Mutex::new(0));
        let logger = AuditLogger::with_sinks(vec![Box::new(CountingSink(hits.clone()))]);
        logger.log(
            AuditEvent::ToolDenied { tool_name: "RUN_COMMAND".into() },
            "s",
            "RUN_COMMAND",
            AuditOutcome::Denied,
            None,
        );
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn event_serializes_with_tag() {
        let json = serde_json::to_string(&AuditEvent::PathDenied { path: "x".into() }).unwrap();
        assert!(json.contains(r#""type":"path_denied""#));
    }
}
