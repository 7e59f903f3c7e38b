//! Security/audit event contract.
//!
//! # Responsibility
//! - Define the structured event emitted for rejections, denials and
//!   committed mutations.
//! - Provide the log-backed default sink and an in-memory recorder.
//!
//! # Invariants
//! - Event messages carry metadata only (codes, ids, paths), never raw task
//!   text.
//! - Recording an event never fails and never panics.

use crate::logging::sanitize_message;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

const MAX_LOGGED_MESSAGE_CHARS: usize = 240;

/// Audit event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    ValidationError,
    SecurityThreat,
    RateLimitExceeded,
    TaskMutation,
    StorageFailure,
}

impl SecurityEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::SecurityThreat => "security_threat",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::TaskMutation => "task_mutation",
            Self::StorageFailure => "storage_failure",
        }
    }
}

/// One structured audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    #[serde(rename = "type")]
    pub kind: SecurityEventKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind, message: impl Into<String>, user_id: Option<&str>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            user_id: user_id.map(str::to_string),
        }
    }
}

/// Downstream consumer of audit events.
pub trait SecurityEventSink: Send + Sync {
    fn record(&self, event: SecurityEvent);
}

/// Sink that writes events to the `log` facade.
///
/// Committed mutations log at `info`, everything else at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

impl SecurityEventSink for LogEventSink {
    fn record(&self, event: SecurityEvent) {
        let message = sanitize_message(&event.message, MAX_LOGGED_MESSAGE_CHARS);
        let user_id = event.user_id.as_deref().unwrap_or("anonymous");
        match event.kind {
            SecurityEventKind::TaskMutation => info!(
                "event=security_event module=security status=ok kind={} user_id={} message={}",
                event.kind.as_str(),
                user_id,
                message
            ),
            _ => warn!(
                "event=security_event module=security status=rejected kind={} user_id={} message={}",
                event.kind.as_str(),
                user_id,
                message
            ),
        }
    }
}

/// Sink that keeps events in memory, for diagnostics panels and tests.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded events in arrival order.
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.lock().clone()
    }

    pub fn count_of(&self, kind: SecurityEventKind) -> usize {
        self.lock().iter().filter(|event| event.kind == kind).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SecurityEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SecurityEventSink for RecordingEventSink {
    fn record(&self, event: SecurityEvent) {
        self.lock().push(event);
    }
}
