//! Debounced auto-save scheduler.
//!
//! # Responsibility
//! - Observe committed mutations and persist the latest full snapshot after
//!   a quiet period.
//! - Record save metrics and raise one degraded alert per failure streak.
//! - Offer an explicit `force_sync` that bypasses the debounce.
//!
//! # Invariants
//! - N mutations inside one debounce window produce one write of the final
//!   state.
//! - At most one `set_item` is in flight per scheduler.
//! - A timer that has started writing is never cancelled.
//! - Storage failures are absorbed into metrics; the next mutation retries
//!   with the full snapshot.

use crate::autosave::metrics::{AutoSaveMetrics, SaveOutcome, SchedulerState};
use crate::config::{AutoSaveConfig, PipelineConfig};
use crate::model::collection::TaskCollection;
use crate::model::mutation::{MutationEvent, MutationKind, MutationObserver};
use crate::security::audit::{SecurityEvent, SecurityEventKind, SecurityEventSink};
use crate::storage::{SnapshotStore, StorageError};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

const FORCE_SYNC_CONTEXT: &str = "force_sync";

/// Scheduler construction errors.
#[derive(Debug)]
pub enum AutoSaveError {
    /// The scheduler was built outside a tokio runtime.
    RuntimeUnavailable(String),
}

impl Display for AutoSaveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RuntimeUnavailable(message) => {
                write!(f, "auto-save requires a tokio runtime: {message}")
            }
        }
    }
}

impl Error for AutoSaveError {}

pub type AutoSaveResult<T> = Result<T, AutoSaveError>;

/// Result of [`AutoSaveScheduler::force_sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForceSyncOutcome {
    pub success: bool,
    /// Collection read back from storage; `None` when nothing is stored.
    pub data: Option<TaskCollection>,
    pub error: Option<StorageError>,
}

impl ForceSyncOutcome {
    fn failed(error: StorageError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Debounced writer of whole-collection snapshots.
///
/// Cheap to clone; clones share one timer, one write gate and one set of
/// metrics.
#[derive(Clone)]
pub struct AutoSaveScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Arc<dyn SnapshotStore>,
    storage_key: String,
    config: AutoSaveConfig,
    events: Arc<dyn SecurityEventSink>,
    user_id: Option<String>,
    runtime: Handle,
    shared: Mutex<Shared>,
    write_gate: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct Shared {
    state: SchedulerState,
    latest: Option<Arc<TaskCollection>>,
    last_operation: Option<MutationKind>,
    dirty: bool,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    metrics: AutoSaveMetrics,
    last_outcome: Option<SaveOutcome>,
    alert_raised: bool,
}

impl AutoSaveScheduler {
    /// Creates a scheduler bound to the current tokio runtime.
    ///
    /// # Errors
    /// - `RuntimeUnavailable` when called outside a runtime context.
    pub fn new(
        storage: Arc<dyn SnapshotStore>,
        storage_key: impl Into<String>,
        config: AutoSaveConfig,
        events: Arc<dyn SecurityEventSink>,
    ) -> AutoSaveResult<Self> {
        Self::build(storage, storage_key.into(), config, events, None)
    }

    /// Creates a scheduler from pipeline config, stamping `user_id` on alerts.
    pub fn from_pipeline_config(
        storage: Arc<dyn SnapshotStore>,
        config: &PipelineConfig,
        events: Arc<dyn SecurityEventSink>,
    ) -> AutoSaveResult<Self> {
        Self::build(
            storage,
            config.storage_key.clone(),
            config.autosave.clone(),
            events,
            config.user_id.clone(),
        )
    }

    fn build(
        storage: Arc<dyn SnapshotStore>,
        storage_key: String,
        config: AutoSaveConfig,
        events: Arc<dyn SecurityEventSink>,
        user_id: Option<String>,
    ) -> AutoSaveResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|err| AutoSaveError::RuntimeUnavailable(err.to_string()))?;
        Ok(Self {
            inner: Arc::new(Inner {
                storage,
                storage_key,
                config,
                events,
                user_id,
                runtime,
                shared: Mutex::new(Shared::default()),
                write_gate: tokio::sync::Mutex::new(()),
            }),
        })
    }

    pub fn storage_key(&self) -> &str {
        &self.inner.storage_key
    }

    pub fn metrics(&self) -> AutoSaveMetrics {
        self.inner.lock().metrics.clone()
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock().state
    }

    pub fn last_outcome(&self) -> Option<SaveOutcome> {
        self.inner.lock().last_outcome
    }

    /// Returns whether the latest observed snapshot is not yet persisted.
    pub fn has_pending_changes(&self) -> bool {
        self.inner.lock().dirty
    }

    /// Records `snapshot` as the latest state and re-arms the debounce timer.
    pub fn schedule(&self, operation: MutationKind, snapshot: Arc<TaskCollection>) {
        let debounce = self.inner.config.debounce();
        let mut shared = self.inner.lock();
        shared.latest = Some(snapshot);
        shared.last_operation = Some(operation);
        shared.dirty = true;
        shared.generation += 1;
        let generation = shared.generation;

        if let Some(timer) = shared.timer.take() {
            timer.abort();
        }
        if shared.state == SchedulerState::Idle {
            shared.state = SchedulerState::PendingWrite;
        }

        let inner = Arc::clone(&self.inner);
        shared.timer = Some(self.inner.runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            inner.on_timer(generation).await;
        }));
        drop(shared);

        debug!(
            "event=autosave_armed module=autosave status=ok operation={} generation={} debounce_ms={}",
            operation,
            generation,
            debounce.as_millis()
        );
    }

    /// Persists pending state immediately and reads it back.
    ///
    /// With unsaved changes this is write-then-confirm; otherwise it is
    /// read-then-confirm against whatever is stored.
    pub async fn force_sync(&self) -> ForceSyncOutcome {
        let inner = &self.inner;
        if let Some(timer) = inner.lock().timer.take() {
            timer.abort();
        }

        let _gate = inner.write_gate.lock().await;
        if let Some(Err(err)) = inner.write_pending(FORCE_SYNC_CONTEXT).await {
            return ForceSyncOutcome::failed(err);
        }

        match inner.storage.get_item(&inner.storage_key).await {
            Ok(data) => {
                info!(
                    "event=autosave_force_sync module=autosave status=ok key={} tasks={}",
                    inner.storage_key,
                    data.as_ref().map_or(0, TaskCollection::len)
                );
                ForceSyncOutcome {
                    success: true,
                    data,
                    error: None,
                }
            }
            Err(err) => {
                warn!(
                    "event=autosave_force_sync module=autosave status=error key={} error_code={}",
                    inner.storage_key,
                    err.code()
                );
                ForceSyncOutcome::failed(err)
            }
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn on_timer(&self, generation: u64) {
        {
            let mut shared = self.lock();
            if shared.generation != generation {
                return;
            }
            // Detach: from here on this write cannot be aborted.
            shared.timer = None;
        }

        let _gate = self.write_gate.lock().await;
        self.write_pending(&self.config.context).await;
    }

    /// Writes the latest snapshot if it is dirty. Caller holds the write gate.
    async fn write_pending(&self, context: &str) -> Option<Result<(), StorageError>> {
        let (snapshot, operation, generation) = {
            let mut shared = self.lock();
            let snapshot = match (shared.dirty, shared.latest.clone()) {
                (true, Some(snapshot)) => snapshot,
                _ => {
                    shared.state = if shared.timer.is_some() {
                        SchedulerState::PendingWrite
                    } else {
                        SchedulerState::Idle
                    };
                    return None;
                }
            };
            shared.state = SchedulerState::Writing;
            (
                snapshot,
                shared.last_operation.unwrap_or(MutationKind::Update),
                shared.generation,
            )
        };

        let result = self
            .storage
            .set_item(&self.storage_key, &snapshot, operation, context)
            .await;

        let alert = {
            let mut shared = self.lock();
            let mut alert = None;
            match &result {
                Ok(()) => {
                    shared.metrics.record_success(Utc::now());
                    shared.last_outcome = Some(SaveOutcome::Saved);
                    shared.alert_raised = false;
                    if shared.generation == generation {
                        shared.dirty = false;
                    }
                }
                Err(err) => {
                    shared.metrics.record_failure(err.to_string());
                    shared.last_outcome = Some(SaveOutcome::Failed);
                    let threshold = self.config.failure_alert_threshold;
                    let failures = shared.metrics.consecutive_failures;
                    if threshold > 0 && failures >= threshold && !shared.alert_raised {
                        shared.alert_raised = true;
                        alert = Some(failures);
                    }
                }
            }
            shared.state = if shared.timer.is_some() || shared.generation != generation {
                SchedulerState::PendingWrite
            } else {
                SchedulerState::Idle
            };
            alert
        };

        match &result {
            Ok(()) => info!(
                "event=autosave_write module=autosave status=ok operation={} context={} generation={} tasks={}",
                operation,
                context,
                generation,
                snapshot.len()
            ),
            Err(err) => warn!(
                "event=autosave_write module=autosave status=error operation={} context={} generation={} error_code={}",
                operation,
                context,
                generation,
                err.code()
            ),
        }

        if let (Some(failures), Err(err)) = (alert, &result) {
            self.raise_degraded_alert(failures, err);
        }
        Some(result)
    }

    fn raise_degraded_alert(&self, failures: u32, err: &StorageError) {
        error!(
            "event=autosave_degraded module=autosave status=error key={} consecutive_failures={} error_code={}",
            self.storage_key,
            failures,
            err.code()
        );
        self.events.record(SecurityEvent::new(
            SecurityEventKind::StorageFailure,
            format!(
                "autosave degraded: key={} consecutive_failures={} error_code={}",
                self.storage_key,
                failures,
                err.code()
            ),
            self.user_id.as_deref(),
        ));
    }
}

impl MutationObserver for AutoSaveScheduler {
    fn on_mutation(&self, event: &MutationEvent) {
        self.schedule(event.kind, Arc::clone(&event.snapshot));
    }
}

impl Debug for AutoSaveScheduler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.lock();
        f.debug_struct("AutoSaveScheduler")
            .field("storage_key", &self.inner.storage_key)
            .field("state", &shared.state)
            .field("dirty", &shared.dirty)
            .field("metrics", &shared.metrics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{AutoSaveError, AutoSaveScheduler};
    use crate::autosave::metrics::{SaveOutcome, SchedulerState};
    use crate::config::AutoSaveConfig;
    use crate::model::collection::TaskCollection;
    use crate::model::mutation::MutationKind;
    use crate::model::task::Task;
    use crate::security::audit::{RecordingEventSink, SecurityEventKind};
    use crate::storage::cipher::TaskCipher;
    use crate::storage::encrypted::EncryptedStorage;
    use crate::storage::memory::MemoryStore;
    use crate::storage::{KeyValueStore, SnapshotStore, StorageError, StorageResult};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const KEY: &str = "taskgo_tasks";

    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        sets: AtomicUsize,
        set_delay: Option<Duration>,
    }

    impl CountingStore {
        fn sets(&self) -> usize {
            self.sets.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeyValueStore for CountingStore {
        async fn get(&self, key: &str) -> StorageResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String) -> StorageResult<()> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.set_delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> StorageResult<()> {
            self.inner.remove(key).await
        }
    }

    struct FailingStore;

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn get(&self, _key: &str) -> StorageResult<Option<String>> {
            Ok(None)
        }

        async fn set(&self, key: &str, _value: String) -> StorageResult<()> {
            Err(StorageError::Io {
                key: key.to_string(),
                message: "disk unavailable".to_string(),
            })
        }

        async fn remove(&self, _key: &str) -> StorageResult<()> {
            Ok(())
        }
    }

    fn encrypted<S: KeyValueStore + 'static>(backend: S) -> Arc<EncryptedStorage<S>> {
        Arc::new(EncryptedStorage::new(backend, TaskCipher::new(&[5u8; 32])))
    }

    fn scheduler(
        storage: Arc<dyn SnapshotStore>,
        sink: Arc<RecordingEventSink>,
    ) -> AutoSaveScheduler {
        AutoSaveScheduler::new(storage, KEY, AutoSaveConfig::default(), sink).unwrap()
    }

    fn grow(collection: &mut TaskCollection, title: &str) -> Arc<TaskCollection> {
        collection.insert(Task::new(title, Utc::now()));
        Arc::new(collection.clone())
    }

    #[test]
    fn construction_requires_runtime() {
        let storage = encrypted(MemoryStore::new());
        let err = AutoSaveScheduler::new(
            storage,
            KEY,
            AutoSaveConfig::default(),
            Arc::new(RecordingEventSink::new()),
        )
        .unwrap_err();
        assert!(matches!(err, AutoSaveError::RuntimeUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_mutations_coalesces_into_one_write() {
        let backend = Arc::new(CountingStore::default());
        let storage = encrypted(Arc::clone(&backend));
        let scheduler = scheduler(storage.clone(), Arc::new(RecordingEventSink::new()));

        let mut collection = TaskCollection::new();
        let mut last = Arc::new(TaskCollection::new());
        for index in 0..5 {
            last = grow(&mut collection, &format!("task {index}"));
            scheduler.schedule(MutationKind::Create, Arc::clone(&last));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(scheduler.state(), SchedulerState::PendingWrite);
        assert_eq!(backend.sets(), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(backend.sets(), 1);
        assert_eq!(scheduler.metrics().total_saves, 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(!scheduler.has_pending_changes());

        let stored = storage.get_item(KEY).await.unwrap().unwrap();
        assert_eq!(stored.len(), 5);
        assert_eq!(&stored, last.as_ref());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_counted_and_alert_once_per_streak() {
        let sink = Arc::new(RecordingEventSink::new());
        let scheduler = scheduler(encrypted(FailingStore), sink.clone());

        let mut collection = TaskCollection::new();
        for index in 0..4 {
            scheduler.schedule(MutationKind::Create, grow(&mut collection, &format!("t{index}")));
            tokio::time::sleep(Duration::from_millis(600)).await;
        }

        let metrics = scheduler.metrics();
        assert_eq!(metrics.failed_saves, 4);
        assert_eq!(metrics.total_saves, 0);
        assert_eq!(metrics.consecutive_failures, 4);
        assert!(metrics.last_error.unwrap().contains("disk unavailable"));
        assert_eq!(scheduler.last_outcome(), Some(SaveOutcome::Failed));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.has_pending_changes());
        assert_eq!(sink.count_of(SecurityEventKind::StorageFailure), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn force_sync_writes_pending_state_and_cancels_timer() {
        let backend = Arc::new(CountingStore::default());
        let scheduler = scheduler(
            encrypted(Arc::clone(&backend)),
            Arc::new(RecordingEventSink::new()),
        );

        let mut collection = TaskCollection::new();
        let snapshot = grow(&mut collection, "Buy groceries");
        scheduler.schedule(MutationKind::Create, Arc::clone(&snapshot));

        let outcome = scheduler.force_sync().await;
        assert!(outcome.success);
        assert_eq!(outcome.data.as_ref(), Some(snapshot.as_ref()));
        assert_eq!(backend.sets(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(backend.sets(), 1);

        let confirm = scheduler.force_sync().await;
        assert!(confirm.success);
        assert_eq!(confirm.data.as_ref(), Some(snapshot.as_ref()));
        assert_eq!(backend.sets(), 1);
        assert_eq!(scheduler.metrics().total_saves, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn force_sync_reports_write_failure() {
        let scheduler = scheduler(encrypted(FailingStore), Arc::new(RecordingEventSink::new()));
        let mut collection = TaskCollection::new();
        scheduler.schedule(MutationKind::Create, grow(&mut collection, "Pay rent"));

        let outcome = scheduler.force_sync().await;
        assert!(!outcome.success);
        assert!(outcome.data.is_none());
        assert!(matches!(outcome.error, Some(StorageError::Io { .. })));
        assert_eq!(scheduler.metrics().failed_saves, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mutation_during_write_is_saved_by_a_follow_up_write() {
        let backend = Arc::new(CountingStore {
            set_delay: Some(Duration::from_secs(1)),
            ..CountingStore::default()
        });
        let storage = encrypted(Arc::clone(&backend));
        let scheduler = scheduler(storage.clone(), Arc::new(RecordingEventSink::new()));

        let mut collection = TaskCollection::new();
        scheduler.schedule(MutationKind::Create, grow(&mut collection, "first"));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(scheduler.state(), SchedulerState::Writing);

        let latest = grow(&mut collection, "second");
        scheduler.schedule(MutationKind::Create, Arc::clone(&latest));
        assert_eq!(scheduler.state(), SchedulerState::Writing);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.sets(), 2);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(!scheduler.has_pending_changes());
        let stored = storage.get_item(KEY).await.unwrap().unwrap();
        assert_eq!(&stored, latest.as_ref());
    }
}
