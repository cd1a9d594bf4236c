use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::{ProcessError, StorageError};

/// Errors raised while processing one claimed job. All of these fail the
/// current attempt; the worker loop records them on the receipt and lets
/// the job store apply its retry policy.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Receipt not found: {0}")]
    ReceiptNotFound(String),

    #[error("Uploaded object missing for receipt {receipt_id}: {key}")]
    UploadNotFound { receipt_id: String, key: String },

    #[error("Text extraction failed: {0}")]
    Process(#[from] ProcessError),

    #[error("Object storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
