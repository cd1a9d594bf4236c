use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FiscusError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors from the external text-extraction (OCR) process.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to start OCR process '{program}': {source}")]
    OcrSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to OCR process stdin: {0}")]
    OcrStdin(std::io::Error),

    #[error("OCR failed (code {code}): {stderr}")]
    OcrFailed { code: i32, stderr: String },

    #[error("Failed to parse OCR output: {0}")]
    OcrOutput(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("IO error for object '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FiscusError>;
