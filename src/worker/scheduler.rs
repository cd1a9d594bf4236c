//! Polling job scheduler.
//!
//! A single logical worker per process: each tick claims at most one
//! queued job and runs the pipeline for it. The tick body is awaited to
//! completion before the next tick fires, so a slow job can never
//! overlap the next claim. Multiple processes may run this loop against
//! the same database; the atomic claim keeps them from colliding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{error, info};

use crate::db::job_repo::{self, JobRow};
use crate::db::receipt_repo::{self, ReceiptPatch};
use crate::db::{Database, DatabaseError};
use crate::pipeline::{Pipeline, ProcessingStage};

/// Cap applied to error messages stored on the receipt.
const MAX_STORED_ERROR_CHARS: usize = 1000;

/// Periodic receipt job scheduler.
pub struct JobScheduler {
    db: Database,
    pipeline: Arc<Pipeline>,
    tick: Duration,
    retry_delay_seconds: i64,
    shutdown: Arc<AtomicBool>,
}

impl JobScheduler {
    pub fn new(
        db: Database,
        pipeline: Arc<Pipeline>,
        tick: Duration,
        retry_delay_seconds: i64,
    ) -> Self {
        Self {
            db,
            pipeline,
            tick,
            retry_delay_seconds,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the polling loop in a background thread.
    pub fn start(&self) -> JoinHandle<()> {
        let db = self.db.clone();
        let pipeline = Arc::clone(&self.pipeline);
        let shutdown = Arc::clone(&self.shutdown);
        let tick = self.tick;
        let retry_delay_seconds = self.retry_delay_seconds;

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let mut interval_timer = tokio::time::interval(tick);
                interval_timer.tick().await; // skip immediate first tick

                loop {
                    interval_timer.tick().await;

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    if let Err(e) =
                        tick_once(&db, &pipeline, retry_delay_seconds).await
                    {
                        error!("Worker tick failed: {}", e);
                    }
                }
            });
        })
    }

    /// Signals the scheduler to stop. The in-flight tick finishes; no new
    /// tick starts.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Claims and processes at most one job. Returns whether a job was
    /// claimed. Exposed for tests and manual draining.
    pub async fn work_once(&self) -> Result<bool, DatabaseError> {
        tick_once(&self.db, &self.pipeline, self.retry_delay_seconds).await
    }
}

/// One scheduler tick: claim at most one job and run it. Errors from the
/// job itself are recorded and absorbed so one bad job never stops the
/// loop; only claim-level database errors propagate.
async fn tick_once(
    db: &Database,
    pipeline: &Pipeline,
    retry_delay_seconds: i64,
) -> Result<bool, DatabaseError> {
    let Some(job) = job_repo::claim_next(db)? else {
        return Ok(false);
    };

    info!(
        "Claimed job {} for receipt {} (attempt {}/{})",
        job.id, job.receipt_id, job.attempts, job.max_attempts
    );

    match pipeline.process(&job).await {
        Ok(()) => {
            if let Err(e) = job_repo::mark_succeeded(db, &job.id) {
                error!("Failed to mark job {} succeeded: {}", job.id, e);
            } else {
                info!("Job {} succeeded", job.id);
            }
        }
        Err(err) => {
            error!("Job {} failed: {}", job.id, err);
            record_failure(db, &job, &err.to_string(), retry_delay_seconds);
        }
    }

    Ok(true)
}

/// Marks the receipt failed with a truncated error and applies the job
/// store's retry policy. Both writes are best-effort; a persistence
/// error here only logs.
fn record_failure(db: &Database, job: &JobRow, message: &str, retry_delay_seconds: i64) {
    let truncated: String = message.chars().take(MAX_STORED_ERROR_CHARS).collect();

    let patch = ReceiptPatch {
        processing_status: Some("failed".to_string()),
        processing_stage: Some(ProcessingStage::Failed.as_str().to_string()),
        processing_error: Some(truncated.clone()),
        ..Default::default()
    };
    if let Err(e) = receipt_repo::update_fields(db, &job.owner_id, &job.receipt_id, &patch) {
        error!("Failed to record failure on receipt {}: {}", job.receipt_id, e);
    }

    match job_repo::retry_or_fail(db, &job.id, &truncated, retry_delay_seconds) {
        Ok(Some(updated)) if updated.status == "queued" => {
            info!(
                "Job {} requeued after failure (attempt {}/{})",
                job.id, updated.attempts, updated.max_attempts
            );
        }
        Ok(Some(updated)) => {
            error!("Job {} failed permanently after {} attempts", job.id, updated.attempts);
        }
        Ok(None) => error!("Job {} vanished while recording failure", job.id),
        Err(e) => error!("Failed to apply retry policy for job {}: {}", job.id, e),
    }
}
