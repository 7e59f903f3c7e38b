use std::sync::Arc;
use taskgo_core::{
    AutoSaveScheduler, EncryptedStorage, FileStore, MemoryStore, MutationKind, NewTask,
    PipelineConfig, Priority, Project, RecordingEventSink, SecurityEventKind, StartupLoad,
    StorageError, TaskCipher, TaskCollection, TaskService,
};

fn seeded_collection() -> TaskCollection {
    let mut service = TaskService::new(Arc::new(RecordingEventSink::new()));
    service
        .create_task(
            NewTask::new("Quarterly review")
                .with_description("slides <b>and</b> notes")
                .with_priority(Priority::High)
                .with_project(Project::Work),
        )
        .unwrap();
    service.create_task(NewTask::new("Gym session")).unwrap();
    service.snapshot().as_ref().clone()
}

#[tokio::test]
async fn file_store_roundtrip_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::default();
    let cipher = TaskCipher::from_secret("correct horse", "taskgo");

    {
        let storage = Arc::new(EncryptedStorage::new(
            FileStore::new(dir.path()),
            cipher.clone(),
        ));
        let sink = Arc::new(RecordingEventSink::new());
        let scheduler =
            AutoSaveScheduler::from_pipeline_config(storage.clone(), &config, sink.clone())
                .unwrap();
        let mut service = TaskService::from_config(&config, sink);
        service.subscribe(Arc::new(scheduler.clone()));
        service
            .create_task(NewTask::new("Persist me").with_project(Project::Study))
            .unwrap();

        let outcome = scheduler.force_sync().await;
        assert!(outcome.success);
    }

    let raw = std::fs::read_to_string(dir.path().join("taskgo_tasks.blob")).unwrap();
    assert!(raw.starts_with("tg1:"));
    assert!(!raw.contains("Persist me"));

    let storage = EncryptedStorage::new(FileStore::new(dir.path()), cipher);
    let mut restarted = TaskService::from_config(&config, Arc::new(RecordingEventSink::new()));
    assert_eq!(
        restarted
            .load_from_storage(&storage, &config.storage_key)
            .await,
        StartupLoad::Loaded(1)
    );
    let task = restarted.list_tasks()[0];
    assert_eq!(task.title, "Persist me");
    assert_eq!(task.project, Project::Study);
}

#[tokio::test]
async fn wrong_secret_starts_empty_with_storage_failure_event() {
    let backend = Arc::new(MemoryStore::new());
    let writer = EncryptedStorage::new(Arc::clone(&backend), TaskCipher::from_secret("a", "s"));
    writer
        .set_item("taskgo_tasks", &seeded_collection(), MutationKind::Create, "test")
        .await
        .unwrap();

    let reader = EncryptedStorage::new(Arc::clone(&backend), TaskCipher::from_secret("b", "s"));
    let sink = Arc::new(RecordingEventSink::new());
    let mut service = TaskService::new(sink.clone());
    let outcome = service.load_from_storage(&reader, "taskgo_tasks").await;

    assert!(matches!(
        outcome,
        StartupLoad::Failed(StorageError::Decryption(_))
    ));
    assert!(service.is_empty());
    assert_eq!(sink.count_of(SecurityEventKind::StorageFailure), 1);
}

#[tokio::test]
async fn get_after_set_returns_same_collection() {
    let storage = EncryptedStorage::new(MemoryStore::new(), TaskCipher::new(&[11u8; 32]));
    let tasks = seeded_collection();

    storage
        .set_item("taskgo_tasks", &tasks, MutationKind::Update, "test")
        .await
        .unwrap();
    let loaded = storage.get_item("taskgo_tasks").await.unwrap().unwrap();

    assert_eq!(loaded, tasks);
    let sealed = storage.seal("taskgo_tasks", &tasks).unwrap();
    assert_eq!(storage.open("taskgo_tasks", &sealed).unwrap(), tasks);
}

#[tokio::test]
async fn quota_exceeded_is_reported_and_previous_blob_kept() {
    let storage = EncryptedStorage::new(MemoryStore::with_quota(4096), TaskCipher::new(&[4u8; 32]));
    let small = seeded_collection();
    storage
        .set_item("taskgo_tasks", &small, MutationKind::Create, "test")
        .await
        .unwrap();

    let mut service = TaskService::new(Arc::new(RecordingEventSink::new()));
    for index in 0..40 {
        service
            .create_task(NewTask::new(format!("Bulk task number {index}")))
            .unwrap();
    }
    let err = storage
        .set_item("taskgo_tasks", &service.snapshot(), MutationKind::Create, "test")
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::QuotaExceeded { .. }));
    assert_eq!(storage.get_item("taskgo_tasks").await.unwrap().unwrap(), small);
}
