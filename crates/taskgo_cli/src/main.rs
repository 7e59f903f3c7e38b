//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `taskgo_core` linkage.
//! - With a data directory argument, run one end-to-end persistence round:
//!   load, create a task, force-sync and print metrics.
//!
//! Usage: `taskgo_cli [DATA_DIR]`. The cipher secret is read from
//! `TASKGO_SECRET`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use taskgo_core::{
    default_log_level, init_logging, AutoSaveScheduler, EncryptedStorage, FileStore,
    LogEventSink, NewTask, PipelineConfig, StartupLoad, TaskCipher, TaskService,
};

const CONFIG_FILE_NAME: &str = "taskgo.toml";
const SECRET_ENV: &str = "TASKGO_SECRET";
const CIPHER_SALT: &str = "taskgo-cli";

#[tokio::main]
async fn main() -> ExitCode {
    println!("taskgo_core ping={}", taskgo_core::ping());
    println!("taskgo_core version={}", taskgo_core::core_version());

    let Some(data_dir) = std::env::args_os().nth(1).map(PathBuf::from) else {
        return ExitCode::SUCCESS;
    };

    match run_round(&data_dir).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("taskgo_cli error: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn run_round(data_dir: &Path) -> Result<(), String> {
    let data_dir = std::path::absolute(data_dir)
        .map_err(|err| format!("cannot resolve `{}`: {err}", data_dir.display()))?;
    let log_dir = data_dir.join("logs");
    init_logging(default_log_level(), &log_dir.to_string_lossy()).map_err(|err| err.to_string())?;

    let config_path = data_dir.join(CONFIG_FILE_NAME);
    let config = if config_path.exists() {
        PipelineConfig::load(&config_path).map_err(|err| err.to_string())?
    } else {
        PipelineConfig::default()
    };

    let secret = std::env::var(SECRET_ENV)
        .map_err(|_| format!("set {SECRET_ENV} to the storage secret"))?;
    let storage = Arc::new(EncryptedStorage::new(
        FileStore::new(data_dir.join("store")),
        TaskCipher::from_secret(&secret, CIPHER_SALT),
    ));

    let events = Arc::new(LogEventSink);
    let mut service = TaskService::from_config(&config, events.clone());
    match service
        .load_from_storage(storage.as_ref(), &config.storage_key)
        .await
    {
        StartupLoad::Loaded(count) => println!("loaded tasks={count}"),
        StartupLoad::Empty => println!("loaded tasks=0"),
        StartupLoad::Failed(err) => println!("load failed, starting empty: {err}"),
    }

    let scheduler = AutoSaveScheduler::from_pipeline_config(storage, &config, events)
        .map_err(|err| err.to_string())?;
    service.subscribe(Arc::new(scheduler.clone()));

    let title = format!("CLI probe task #{}", service.len() + 1);
    let task = service
        .create_task(NewTask::new(title))
        .map_err(|err| err.to_string())?;
    println!("created task id={}", task.id());

    let outcome = scheduler.force_sync().await;
    if !outcome.success {
        let reason = outcome
            .error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        return Err(format!("force sync failed: {reason}"));
    }
    println!(
        "synced tasks={}",
        outcome.data.map_or(0, |collection| collection.len())
    );

    let metrics = scheduler.metrics();
    log::info!(
        "event=cli_round module=cli status=ok total_saves={} failed_saves={}",
        metrics.total_saves,
        metrics.failed_saves
    );
    println!(
        "metrics total_saves={} failed_saves={}",
        metrics.total_saves, metrics.failed_saves
    );
    Ok(())
}
