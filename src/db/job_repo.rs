//! Job repository: the durable work queue backing the scheduler.
//!
//! One row per (receipt, job_type) pair; re-enqueueing an existing pair
//! resets it to `queued` instead of inserting a second row. The claim
//! operation is a single UPDATE statement, so concurrent claimers (other
//! threads or other worker processes sharing the file) can never take
//! the same job twice.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_rfc3339, rfc3339_after_seconds, Database, DatabaseError};

pub const DEFAULT_JOB_TYPE: &str = "process_receipt";

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub receipt_id: String,
    pub owner_id: String,
    pub job_type: String,
    pub status: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub run_after: String,
    pub last_error: String,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            receipt_id: row.get("receipt_id")?,
            owner_id: row.get("owner_id")?,
            job_type: row.get("job_type")?,
            status: row.get("status")?,
            attempts: row.get("attempts")?,
            max_attempts: row.get("max_attempts")?,
            run_after: row.get("run_after")?,
            last_error: row.get("last_error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

/// Enqueues a processing job for a receipt.
///
/// If a job for the same (receipt, job_type) already exists it is reset
/// to `queued` with run-eligible-now; the attempt history is kept and the
/// error cleared. This makes re-confirmation of an upload idempotent.
pub fn enqueue(
    db: &Database,
    owner_id: &str,
    receipt_id: &str,
    job_type: &str,
    max_attempts: u32,
) -> Result<JobRow, DatabaseError> {
    let now = now_rfc3339();
    let id = uuid::Uuid::new_v4().to_string();
    db.with_conn(|conn| {
        let row = conn.query_row(
            "INSERT INTO receipt_jobs (
                 id, receipt_id, owner_id, job_type, status, attempts, max_attempts,
                 run_after, last_error, created_at, updated_at
             )
             VALUES (?1, ?2, ?3, ?4, 'queued', 0, ?5, ?6, '', ?6, ?6)
             ON CONFLICT (receipt_id, job_type) DO UPDATE SET
                 status = 'queued',
                 run_after = excluded.run_after,
                 started_at = NULL,
                 finished_at = NULL,
                 last_error = '',
                 updated_at = excluded.updated_at
             RETURNING *",
            params![id, receipt_id, owner_id, job_type, max_attempts, now],
            JobRow::from_row,
        )?;
        Ok(row)
    })
}

/// Atomically claims the oldest eligible queued job, if any.
///
/// The selection and the transition to `processing` (with the attempt
/// increment) happen in one UPDATE statement, which SQLite executes
/// atomically; a second claimer, even from another process, sees either
/// the job already in `processing` or a different job.
pub fn claim_next(db: &Database) -> Result<Option<JobRow>, DatabaseError> {
    let now = now_rfc3339();
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "UPDATE receipt_jobs SET
                     status = 'processing',
                     attempts = attempts + 1,
                     started_at = ?1,
                     updated_at = ?1
                 WHERE id = (
                     SELECT id FROM receipt_jobs
                     WHERE status = 'queued' AND run_after <= ?1
                     ORDER BY created_at ASC, id ASC
                     LIMIT 1
                 )
                 RETURNING *",
                params![now],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Marks a job as succeeded, stamping the finish time and clearing the error.
pub fn mark_succeeded(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let now = now_rfc3339();
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "UPDATE receipt_jobs SET
                     status = 'succeeded',
                     finished_at = ?2,
                     last_error = '',
                     updated_at = ?2
                 WHERE id = ?1
                 RETURNING *",
                params![id, now],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Requeues the job after a delay, or fails it permanently once its
/// attempt budget (already incremented by the claim) is exhausted.
pub fn retry_or_fail(
    db: &Database,
    id: &str,
    error_message: &str,
    retry_delay_seconds: i64,
) -> Result<Option<JobRow>, DatabaseError> {
    let now = now_rfc3339();
    let run_after = rfc3339_after_seconds(retry_delay_seconds.max(5));
    let error: String = error_message.chars().take(1000).collect();
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "UPDATE receipt_jobs SET
                     status = CASE WHEN attempts < max_attempts THEN 'queued' ELSE 'failed' END,
                     run_after = CASE WHEN attempts < max_attempts THEN ?3 ELSE run_after END,
                     finished_at = CASE WHEN attempts < max_attempts THEN NULL ELSE ?4 END,
                     last_error = ?2,
                     updated_at = ?4
                 WHERE id = ?1
                 RETURNING *",
                params![id, error, run_after, now],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM receipt_jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM receipt_jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
