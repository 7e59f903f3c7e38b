//! Core persistence and integrity pipeline for TaskGo.
//! This crate is the single source of truth for task invariants.

pub mod autosave;
pub mod config;
pub mod logging;
pub mod model;
pub mod security;
pub mod service;
pub mod storage;
pub mod validation;

pub use autosave::{
    AutoSaveError, AutoSaveMetrics, AutoSaveScheduler, ForceSyncOutcome, SaveOutcome,
    SchedulerState,
};
pub use config::{AutoSaveConfig, ConfigError, PipelineConfig, RateLimitConfig};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::collection::{CollectionError, TaskCollection};
pub use model::mutation::{MutationEvent, MutationKind, MutationObserver};
pub use model::task::{Priority, Project, Task, TaskId, TaskStatus, TaskValidationError};
pub use security::audit::{
    LogEventSink, RecordingEventSink, SecurityEvent, SecurityEventKind, SecurityEventSink,
};
pub use security::rate_limiter::{RateLimitDecision, RateLimiter};
pub use security::threat::{detect_attack_signature, validate_request, AttackType, RequestValidation};
pub use service::task_service::{
    NewTask, StartupLoad, TaskPatch, TaskService, TaskServiceError, TaskServiceResult,
};
pub use storage::cipher::TaskCipher;
pub use storage::encrypted::EncryptedStorage;
pub use storage::file::FileStore;
pub use storage::memory::MemoryStore;
pub use storage::{KeyValueStore, SnapshotStore, StorageError, StorageResult};
pub use validation::sanitize::{
    contains_control_chars, sanitize_for_display, validate_description, validate_title,
    ValidationErrorKind,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
