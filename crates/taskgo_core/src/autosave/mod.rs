//! Debounced background persistence of the task collection.

pub mod metrics;
pub mod scheduler;

pub use metrics::{AutoSaveMetrics, SaveOutcome, SchedulerState};
pub use scheduler::{AutoSaveError, AutoSaveResult, AutoSaveScheduler, ForceSyncOutcome};
