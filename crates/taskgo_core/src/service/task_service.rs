//! Task use-case service.
//!
//! # Responsibility
//! - Own the in-memory `TaskCollection` as its single writer.
//! - Gate every mutation through field validation, rate limiting and request
//!   threat scanning.
//! - Emit audit events and notify mutation observers after each commit.
//!
//! # Invariants
//! - A rejected or denied call leaves the collection untouched and never
//!   reaches observers or storage.
//! - Stored titles/descriptions are always the sanitized form.
//! - Observers see mutations in call order, each with the full post-mutation
//!   snapshot.

use crate::config::PipelineConfig;
use crate::model::collection::TaskCollection;
use crate::model::mutation::{MutationEvent, MutationKind, MutationObserver};
use crate::model::task::{Priority, Project, Task, TaskId, TaskStatus};
use crate::security::audit::{SecurityEvent, SecurityEventKind, SecurityEventSink};
use crate::security::rate_limiter::RateLimiter;
use crate::security::threat::{detect_attack_signature, validate_request};
use crate::storage::{SnapshotStore, StorageError};
use crate::validation::sanitize::{validate_description, validate_title, ValidationErrorKind};
use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Service error for task use-cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskServiceError {
    /// A string field failed validation.
    Validation {
        field: &'static str,
        kind: ValidationErrorKind,
    },
    /// The assembled request carried injection patterns.
    SecurityThreat { threats: Vec<String> },
    /// The operation exhausted its admission budget.
    RateLimitExceeded { operation: &'static str },
    TaskNotFound(TaskId),
}

impl Display for TaskServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation { field, kind } => write!(f, "invalid {field}: {kind}"),
            Self::SecurityThreat { threats } => {
                write!(f, "request rejected: {}", threats.join(", "))
            }
            Self::RateLimitExceeded { operation } => {
                write!(f, "rate limit exceeded for `{operation}`")
            }
            Self::TaskNotFound(id) => write!(f, "task not found: {id}"),
        }
    }
}

impl Error for TaskServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

pub type TaskServiceResult<T> = Result<T, TaskServiceError>;

/// Create input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub project: Project,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_project(mut self, project: Project) -> Self {
        self.project = project;
        self
    }
}

/// Partial update; only carried fields change.
///
/// `description: Some(None)` clears the description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub project: Option<Project>,
}

impl TaskPatch {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(Some(description.into()));
        self
    }

    pub fn clear_description(mut self) -> Self {
        self.description = Some(None);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn project(mut self, project: Project) -> Self {
        self.project = Some(project);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Result of the one-shot startup load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupLoad {
    Loaded(usize),
    /// Nothing stored under the key yet.
    Empty,
    /// Storage or decryption failed; the service starts empty.
    Failed(StorageError),
}

/// Single writer of the task collection.
pub struct TaskService {
    tasks: TaskCollection,
    rate_limiter: RateLimiter,
    events: Arc<dyn SecurityEventSink>,
    observers: Vec<Arc<dyn MutationObserver>>,
    user_id: Option<String>,
}

impl TaskService {
    /// Creates an empty service with default admission limits.
    pub fn new(events: Arc<dyn SecurityEventSink>) -> Self {
        Self {
            tasks: TaskCollection::new(),
            rate_limiter: RateLimiter::default(),
            events,
            observers: Vec::new(),
            user_id: None,
        }
    }

    pub fn from_config(config: &PipelineConfig, events: Arc<dyn SecurityEventSink>) -> Self {
        Self {
            rate_limiter: RateLimiter::from_config(&config.rate_limit),
            user_id: config.user_id.clone(),
            ..Self::new(events)
        }
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Registers an observer notified after every committed mutation.
    pub fn subscribe(&mut self, observer: Arc<dyn MutationObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get_task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Lists tasks ordered by `created_at ASC, id ASC`.
    pub fn list_tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.iter().collect();
        tasks.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(&b.id()))
        });
        tasks
    }

    /// Returns a shareable copy of the current collection.
    pub fn snapshot(&self) -> Arc<TaskCollection> {
        Arc::new(self.tasks.clone())
    }

    /// Clears all admission windows.
    pub fn reset_rate_limits(&mut self) {
        self.rate_limiter.clear();
    }

    /// Replaces the collection with the stored snapshot.
    ///
    /// Intended to run once before observers are subscribed; observers are
    /// not notified. Failures leave the service empty and are logged.
    pub async fn load_from_storage(&mut self, storage: &dyn SnapshotStore, key: &str) -> StartupLoad {
        match storage.get_item(key).await {
            Ok(Some(collection)) => {
                let count = collection.len();
                self.tasks = collection;
                info!(
                    "event=startup_load module=service status=ok key={} tasks={}",
                    key, count
                );
                StartupLoad::Loaded(count)
            }
            Ok(None) => {
                self.tasks = TaskCollection::new();
                info!("event=startup_load module=service status=empty key={key}");
                StartupLoad::Empty
            }
            Err(err) => {
                self.tasks = TaskCollection::new();
                error!(
                    "event=startup_load module=service status=error key={} error_code={} error={}",
                    key,
                    err.code(),
                    err
                );
                self.emit(
                    SecurityEventKind::StorageFailure,
                    format!("startup load failed: key={} error_code={}", key, err.code()),
                );
                StartupLoad::Failed(err)
            }
        }
    }

    /// Validates, admits and inserts a new task.
    pub fn create_task(&mut self, input: NewTask) -> TaskServiceResult<Task> {
        let kind = MutationKind::Create;
        let title = self.checked_title(kind, &input.title)?;
        let description = self.checked_description(kind, input.description.as_deref())?;
        self.admit(kind)?;
        self.scan_request(
            kind,
            json!({
                "title": title,
                "description": description,
                "priority": input.priority,
                "status": input.status,
                "project": input.project,
            }),
        )?;
        self.classify_fields(
            kind,
            &[
                ("title", Some(input.title.as_str())),
                ("description", input.description.as_deref()),
            ],
        );

        let mut task = Task::new(title, Utc::now());
        task.description = description;
        task.priority = input.priority;
        task.status = input.status;
        task.project = input.project;

        self.tasks.insert(task.clone());
        self.commit(kind, task.id());
        Ok(task)
    }

    /// Applies `patch` to an existing task and bumps `updated_at`.
    pub fn update_task(&mut self, id: TaskId, patch: TaskPatch) -> TaskServiceResult<Task> {
        let kind = MutationKind::Update;
        let title = match patch.title.as_deref() {
            Some(raw) => Some(self.checked_title(kind, raw)?),
            None => None,
        };
        let description = match &patch.description {
            Some(raw) => Some(self.checked_description(kind, raw.as_deref())?),
            None => None,
        };
        if !self.tasks.contains(id) {
            return Err(TaskServiceError::TaskNotFound(id));
        }
        self.admit(kind)?;

        let mut request = Map::new();
        request.insert("id".to_string(), Value::String(id.to_string()));
        if let Some(title) = &title {
            request.insert("title".to_string(), Value::String(title.clone()));
        }
        if let Some(Some(description)) = &description {
            request.insert(
                "description".to_string(),
                Value::String(description.clone()),
            );
        }
        self.scan_request(kind, Value::Object(request))?;
        self.classify_fields(
            kind,
            &[
                ("title", patch.title.as_deref()),
                ("description", patch.description.as_ref().and_then(|d| d.as_deref())),
            ],
        );

        let task = self
            .tasks
            .get_mut(id)
            .ok_or(TaskServiceError::TaskNotFound(id))?;
        if let Some(title) = title {
            task.title = title;
        }
        if let Some(description) = description {
            task.description = description;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(project) = patch.project {
            task.project = project;
        }
        task.touch(Utc::now());
        let updated = task.clone();

        self.commit(kind, id);
        Ok(updated)
    }

    /// Removes a task and returns it.
    pub fn delete_task(&mut self, id: TaskId) -> TaskServiceResult<Task> {
        let kind = MutationKind::Delete;
        if !self.tasks.contains(id) {
            return Err(TaskServiceError::TaskNotFound(id));
        }
        self.admit(kind)?;
        let removed = self
            .tasks
            .remove(id)
            .ok_or(TaskServiceError::TaskNotFound(id))?;
        self.commit(kind, id);
        Ok(removed)
    }

    fn checked_title(&self, kind: MutationKind, raw: &str) -> TaskServiceResult<String> {
        validate_title(raw).map_err(|err| self.reject_field(kind, "title", raw, err))
    }

    fn checked_description(
        &self,
        kind: MutationKind,
        raw: Option<&str>,
    ) -> TaskServiceResult<Option<String>> {
        validate_description(raw)
            .map_err(|err| self.reject_field(kind, "description", raw.unwrap_or_default(), err))
    }

    fn reject_field(
        &self,
        kind: MutationKind,
        field: &'static str,
        raw: &str,
        err: ValidationErrorKind,
    ) -> TaskServiceError {
        let operation = kind.operation_name();
        if err == ValidationErrorKind::DangerousContent {
            let attack = detect_attack_signature(raw)
                .map(|attack| attack.as_str())
                .unwrap_or("dangerous_content");
            self.emit(
                SecurityEventKind::SecurityThreat,
                format!("operation={operation} field={field} attack_type={attack}"),
            );
        } else {
            self.emit(
                SecurityEventKind::ValidationError,
                format!("operation={operation} field={field} reason={}", err.as_str()),
            );
        }
        TaskServiceError::Validation { field, kind: err }
    }

    /// Labels accepted fields that still look like an attack. Never blocks.
    fn classify_fields(&self, kind: MutationKind, fields: &[(&'static str, Option<&str>)]) {
        let operation = kind.operation_name();
        for (field, raw) in fields {
            let Some(attack) = raw.and_then(detect_attack_signature) else {
                continue;
            };
            warn!(
                "event=attack_signature module=service status=accepted operation={} field={} attack_type={}",
                operation,
                field,
                attack.as_str()
            );
            self.emit(
                SecurityEventKind::SecurityThreat,
                format!("operation={operation} field={field} attack_type={}", attack.as_str()),
            );
        }
    }

    fn admit(&mut self, kind: MutationKind) -> TaskServiceResult<()> {
        let operation = kind.operation_name();
        let decision = self.rate_limiter.check_rate_limit(operation);
        if decision.allowed {
            return Ok(());
        }
        warn!("event=rate_limit module=service status=denied operation={operation}");
        self.emit(
            SecurityEventKind::RateLimitExceeded,
            format!("operation={operation}"),
        );
        Err(TaskServiceError::RateLimitExceeded { operation })
    }

    fn scan_request(&self, kind: MutationKind, request: Value) -> TaskServiceResult<()> {
        let validation = validate_request(&request);
        if validation.valid {
            return Ok(());
        }
        self.emit(
            SecurityEventKind::SecurityThreat,
            format!(
                "operation={} threats={}",
                kind.operation_name(),
                validation.threats.join("; ")
            ),
        );
        Err(TaskServiceError::SecurityThreat {
            threats: validation.threats,
        })
    }

    fn commit(&self, kind: MutationKind, task_id: TaskId) {
        info!(
            "event=task_mutation module=service status=ok operation={} task_id={} tasks={}",
            kind,
            task_id,
            self.tasks.len()
        );
        self.emit(
            SecurityEventKind::TaskMutation,
            format!("operation={} task_id={}", kind.operation_name(), task_id),
        );

        if self.observers.is_empty() {
            return;
        }
        let event = MutationEvent {
            kind,
            task_id,
            snapshot: self.snapshot(),
        };
        for observer in &self.observers {
            observer.on_mutation(&event);
        }
    }

    fn emit(&self, kind: SecurityEventKind, message: String) {
        self.events
            .record(SecurityEvent::new(kind, message, self.user_id.as_deref()));
    }
}

#[cfg(test)]
mod tests {
    use super::{NewTask, StartupLoad, TaskPatch, TaskService, TaskServiceError};
    use crate::model::collection::TaskCollection;
    use crate::model::mutation::{MutationEvent, MutationKind, MutationObserver};
    use crate::model::task::{Priority, TaskStatus};
    use crate::security::audit::{RecordingEventSink, SecurityEventKind};
    use crate::security::rate_limiter::RateLimiter;
    use crate::storage::cipher::TaskCipher;
    use crate::storage::encrypted::EncryptedStorage;
    use crate::storage::memory::MemoryStore;
    use crate::validation::sanitize::ValidationErrorKind;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct CollectingObserver {
        events: Mutex<Vec<(MutationKind, usize)>>,
    }

    impl MutationObserver for CollectingObserver {
        fn on_mutation(&self, event: &MutationEvent) {
            self.events
                .lock()
                .unwrap()
                .push((event.kind, event.snapshot.len()));
        }
    }

    fn service() -> (TaskService, Arc<RecordingEventSink>) {
        let sink = Arc::new(RecordingEventSink::new());
        (TaskService::new(sink.clone()), sink)
    }

    #[test]
    fn create_update_delete_flow_notifies_observers_in_order() {
        let (mut service, sink) = service();
        let observer = Arc::new(CollectingObserver::default());
        service.subscribe(observer.clone());

        let created = service
            .create_task(NewTask::new("  Buy groceries  ").with_priority(Priority::High))
            .unwrap();
        assert_eq!(created.title, "Buy groceries");
        assert_eq!(created.priority, Priority::High);
        assert_eq!(created.status, TaskStatus::Todo);

        let updated = service
            .update_task(
                created.id(),
                TaskPatch::default()
                    .status(TaskStatus::Done)
                    .description("milk & eggs"),
            )
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Done);
        assert_eq!(updated.description.as_deref(), Some("milk &amp; eggs"));
        assert!(updated.updated_at() >= updated.created_at());

        service.delete_task(created.id()).unwrap();
        assert!(service.is_empty());

        let seen = observer.events.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (MutationKind::Create, 1),
                (MutationKind::Update, 1),
                (MutationKind::Delete, 0)
            ]
        );
        assert_eq!(sink.count_of(SecurityEventKind::TaskMutation), 3);
    }

    #[test]
    fn injection_title_is_rejected_with_threat_event() {
        let (mut service, sink) = service();
        let observer = Arc::new(CollectingObserver::default());
        service.subscribe(observer.clone());

        let err = service
            .create_task(NewTask::new("<img src=x onerror=alert(1)>"))
            .unwrap_err();
        assert_eq!(
            err,
            TaskServiceError::Validation {
                field: "title",
                kind: ValidationErrorKind::DangerousContent
            }
        );
        assert!(service.is_empty());
        assert!(observer.events.lock().unwrap().is_empty());
        assert_eq!(sink.count_of(SecurityEventKind::SecurityThreat), 1);
        assert!(sink.events()[0].message.contains("attack_type=xss"));
        assert!(!sink.events()[0].message.contains("onerror"));
    }

    #[test]
    fn short_title_is_a_validation_error_event() {
        let (mut service, sink) = service();
        let err = service.create_task(NewTask::new("ab")).unwrap_err();
        assert_eq!(
            err,
            TaskServiceError::Validation {
                field: "title",
                kind: ValidationErrorKind::TooShort
            }
        );
        assert_eq!(sink.count_of(SecurityEventKind::ValidationError), 1);
    }

    #[test]
    fn rate_limit_denial_leaves_collection_untouched() {
        let sink = Arc::new(RecordingEventSink::new());
        let mut service = TaskService::new(sink.clone())
            .with_rate_limiter(RateLimiter::new(2, Duration::from_secs(60)));

        service.create_task(NewTask::new("first task")).unwrap();
        service.create_task(NewTask::new("second task")).unwrap();
        let err = service.create_task(NewTask::new("third task")).unwrap_err();

        assert_eq!(
            err,
            TaskServiceError::RateLimitExceeded {
                operation: "create_task"
            }
        );
        assert_eq!(service.len(), 2);
        assert_eq!(sink.count_of(SecurityEventKind::RateLimitExceeded), 1);

        service.reset_rate_limits();
        service.create_task(NewTask::new("third task")).unwrap();
        assert_eq!(service.len(), 3);
    }

    #[test]
    fn update_and_delete_report_missing_tasks() {
        let (mut service, _sink) = service();
        let missing = Uuid::new_v4();
        assert_eq!(
            service.update_task(missing, TaskPatch::default().title("new title")),
            Err(TaskServiceError::TaskNotFound(missing))
        );
        assert_eq!(
            service.delete_task(missing),
            Err(TaskServiceError::TaskNotFound(missing))
        );
    }

    #[test]
    fn missing_ids_do_not_consume_admission_budget() {
        let sink = Arc::new(RecordingEventSink::new());
        let mut service = TaskService::new(sink.clone())
            .with_rate_limiter(RateLimiter::new(2, Duration::from_secs(60)));
        let task = service.create_task(NewTask::new("real task")).unwrap();
        let missing = Uuid::new_v4();

        for _ in 0..2 {
            assert_eq!(
                service.update_task(missing, TaskPatch::default().title("new title")),
                Err(TaskServiceError::TaskNotFound(missing))
            );
            assert_eq!(
                service.delete_task(missing),
                Err(TaskServiceError::TaskNotFound(missing))
            );
        }

        assert!(service
            .update_task(task.id(), TaskPatch::default().title("renamed task"))
            .is_ok());
        assert!(service.delete_task(task.id()).is_ok());
        assert_eq!(sink.count_of(SecurityEventKind::RateLimitExceeded), 0);
    }

    #[test]
    fn accepted_fields_with_attack_signatures_are_reported_not_blocked() {
        let (mut service, sink) = service();

        let task = service
            .create_task(NewTask::new("x'; DROP TABLE tasks; --"))
            .unwrap();
        assert_eq!(service.len(), 1);
        assert_eq!(sink.count_of(SecurityEventKind::TaskMutation), 1);
        assert_eq!(sink.count_of(SecurityEventKind::SecurityThreat), 1);
        let threat = sink
            .events()
            .into_iter()
            .find(|event| event.kind == SecurityEventKind::SecurityThreat)
            .unwrap();
        assert_eq!(
            threat.message,
            "operation=create_task field=title attack_type=sql_injection"
        );

        service
            .update_task(
                task.id(),
                TaskPatch::default().description("1 UNION SELECT password FROM users"),
            )
            .unwrap();
        assert_eq!(sink.count_of(SecurityEventKind::SecurityThreat), 2);

        service
            .create_task(NewTask::new("Plain groceries"))
            .unwrap();
        assert_eq!(sink.count_of(SecurityEventKind::SecurityThreat), 2);
    }

    #[test]
    fn patch_can_clear_description() {
        let (mut service, _sink) = service();
        let task = service
            .create_task(NewTask::new("Plan trip").with_description("book hotel"))
            .unwrap();
        let updated = service
            .update_task(task.id(), TaskPatch::default().clear_description())
            .unwrap();
        assert_eq!(updated.description, None);
        assert_eq!(updated.title, "Plan trip");
    }

    #[test]
    fn list_is_ordered_by_creation() {
        let (mut service, _sink) = service();
        let first = service.create_task(NewTask::new("first task")).unwrap();
        let second = service.create_task(NewTask::new("second task")).unwrap();
        let ids: Vec<_> = service.list_tasks().iter().map(|task| task.id()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.id()) && ids.contains(&second.id()));
        assert!(service.list_tasks()[0].created_at() <= service.list_tasks()[1].created_at());
    }

    #[tokio::test]
    async fn startup_load_restores_or_falls_back_to_empty() {
        let storage = EncryptedStorage::new(MemoryStore::new(), TaskCipher::new(&[2u8; 32]));

        let (mut service, sink) = service();
        assert_eq!(
            service.load_from_storage(&storage, "taskgo_tasks").await,
            StartupLoad::Empty
        );

        let mut seeded = TaskService::new(Arc::new(RecordingEventSink::new()));
        seeded.create_task(NewTask::new("Persisted task")).unwrap();
        storage
            .set_item(
                "taskgo_tasks",
                &seeded.snapshot(),
                MutationKind::Create,
                "test",
            )
            .await
            .unwrap();
        assert_eq!(
            service.load_from_storage(&storage, "taskgo_tasks").await,
            StartupLoad::Loaded(1)
        );
        assert_eq!(service.list_tasks()[0].title, "Persisted task");

        storage.backend().put_raw("taskgo_tasks", "tg1:garbage");
        let outcome = service.load_from_storage(&storage, "taskgo_tasks").await;
        assert!(matches!(outcome, StartupLoad::Failed(_)));
        assert!(service.is_empty());
        assert_eq!(sink.count_of(SecurityEventKind::StorageFailure), 1);
        assert_eq!(service.snapshot().as_ref(), &TaskCollection::new());
    }
}
