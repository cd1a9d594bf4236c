//! Receipt processing worker.
//!
//! Runs the polling scheduler against the configured database until the
//! process receives SIGINT/SIGTERM. Several workers may run against the
//! same database; the job claim keeps them from colliding.

use std::sync::mpsc;
use std::sync::Arc;

use log::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use fiscus::extract::{FieldExtractor, GeminiClient, OcrCommand};
use fiscus::reconcile::ReconcileOptions;
use fiscus::storage::FsObjectStore;
use fiscus::{Database, FiscusError, Pipeline, ProcessingConfig};
use fiscus::worker::JobScheduler;

fn init_logging() {
    // Route `log` macros through tracing so both ecosystems end up in
    // the same subscriber.
    tracing_log::LogTracer::init().expect("Failed to initialize log bridge");

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config() -> Result<ProcessingConfig, FiscusError> {
    match std::env::args().nth(1) {
        Some(path) => Ok(ProcessingConfig::load(path)?),
        None => Ok(ProcessingConfig::default()),
    }
}

fn main() -> Result<(), FiscusError> {
    init_logging();
    info!("Starting fiscus worker v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    let db_path = config
        .database_path
        .clone()
        .or_else(fiscus::db::default_database_path)
        .ok_or_else(|| {
            FiscusError::Config(fiscus::ConfigError::Validation {
                message: "Cannot determine database path".to_string(),
            })
        })?;
    let db = Database::open(&db_path)?;

    let api_key = config.resolve_api_key().unwrap_or_default();
    if api_key.is_empty() {
        info!("No model API key configured; extraction requests will fail until one is set");
    }

    let store = Arc::new(FsObjectStore::new(&config.storage_root));
    let ocr = Arc::new(OcrCommand::new(
        config.ocr_program.clone(),
        config.ocr_args.clone(),
    ));
    let extractor = FieldExtractor::new(
        Arc::new(GeminiClient::new(api_key)),
        config.ai_model.clone(),
        config.ai_max_chars,
        config.min_candidate_score,
        std::time::Duration::from_millis(config.model_retry_delay_ms),
    );
    let pipeline = Arc::new(Pipeline::new(
        db.clone(),
        store,
        ocr,
        extractor,
        ReconcileOptions {
            base_confidence: config.base_confidence,
            warning_penalty: config.warning_penalty,
        },
        config.keep_receipt_files,
    ));

    let scheduler = JobScheduler::new(db, pipeline, config.tick_interval(), config.retry_delay());
    let handle = scheduler.start();
    info!(
        "Worker polling every {:?} (retry delay {}s)",
        config.tick_interval(),
        config.retry_delay()
    );

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .expect("Failed to install shutdown handler");

    let _ = shutdown_rx.recv();
    info!("Shutdown requested, stopping worker");
    scheduler.stop();
    let _ = handle.join();
    info!("Worker stopped");

    Ok(())
}
