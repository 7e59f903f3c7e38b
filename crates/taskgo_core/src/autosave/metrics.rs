//! Auto-save counters and state reporting types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scheduler write-path state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    /// A debounce timer is armed.
    PendingWrite,
    /// A `set_item` call is in flight.
    Writing,
}

/// Outcome of the most recent completed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved,
    Failed,
}

/// Read-only snapshot of scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSaveMetrics {
    pub total_saves: u64,
    pub failed_saves: u64,
    pub last_save_timestamp: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Failures since the last successful save.
    pub consecutive_failures: u32,
}

impl AutoSaveMetrics {
    pub(crate) fn record_success(&mut self, at: DateTime<Utc>) {
        self.total_saves += 1;
        self.last_save_timestamp = Some(at);
        self.consecutive_failures = 0;
    }

    pub(crate) fn record_failure(&mut self, error: String) {
        self.failed_saves += 1;
        self.last_error = Some(error);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}
