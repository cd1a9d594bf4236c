pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod reconcile;
pub mod storage;
pub mod worker;

pub use config::ProcessingConfig;
pub use db::Database;
pub use error::{ConfigError, FiscusError, ProcessError, Result, StorageError};
pub use extract::{FieldExtractor, GeminiClient, GenerativeClient, OcrCommand, TextExtractor};
pub use pipeline::{Pipeline, PipelineError, ProcessingStage};
pub use reconcile::{Assessment, NormalizedReceipt, ReconcileOptions};
pub use storage::{FsObjectStore, ObjectStore};
pub use worker::JobScheduler;
