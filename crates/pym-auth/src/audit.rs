//! Audit events for failed authentication.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A failed login. Never carries the submitted credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Principal or email the client tried.
    pub identifier: String,
    /// Client address, if known.
    pub origin_address: Option<String>,
    /// Why the attempt failed.
    pub failure_cause: String,
    /// When the attempt failed.
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Create an event stamped with the current time.
    pub fn new(
        identifier: impl Into<String>,
        origin_address: Option<&str>,
        failure_cause: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            origin_address: origin_address.map(str::to_string),
            failure_cause: failure_cause.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Receiver of audit events.
pub trait AuditSink: Send + Sync {
    /// Record an event.
    fn record(&self, event: AuditEvent);
}

/// Writes audit events to the log at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: AuditEvent) {
        log::warn!(
            "Authentication failed for '{}' from {}: {}",
            event.identifier,
            event.origin_address.as_deref().unwrap_or("unknown address"),
            event.failure_cause
        );
    }
}

/// Keeps audit events in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
