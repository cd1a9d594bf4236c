//! Cross-connection job queue tests.
//!
//! The unit tests in `db::job_repo` cover the queue semantics on a single
//! connection; these tests exercise the claim race across independent
//! database handles on one shared file, which is how concurrent worker
//! processes see the queue.

use std::collections::HashSet;
use std::thread;

use fiscus::db::{job_repo, Database};

#[test]
fn test_concurrent_claimers_never_share_a_job() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    let db = Database::open(&path).unwrap();
    const JOBS: usize = 25;
    for i in 0..JOBS {
        job_repo::enqueue(&db, "u1", &format!("receipt-{i}"), job_repo::DEFAULT_JOB_TYPE, 3)
            .unwrap();
    }

    const CLAIMERS: usize = 4;
    let mut handles = Vec::new();
    for _ in 0..CLAIMERS {
        let path = path.clone();
        handles.push(thread::spawn(move || {
            // Each claimer opens its own connection, like a separate
            // worker process would.
            let db = Database::open(&path).unwrap();
            let mut claimed = Vec::new();
            loop {
                match job_repo::claim_next(&db).unwrap() {
                    Some(job) => claimed.push(job.id),
                    None => break,
                }
            }
            claimed
        }));
    }

    let mut all_claims = Vec::new();
    for handle in handles {
        all_claims.extend(handle.join().unwrap());
    }

    let unique: HashSet<_> = all_claims.iter().cloned().collect();
    assert_eq!(unique.len(), all_claims.len(), "a job was claimed twice");
    assert_eq!(unique.len(), JOBS, "not every job was claimed exactly once");
}

#[test]
fn test_claims_resume_after_retry_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    let db_a = Database::open(&path).unwrap();
    let db_b = Database::open(&path).unwrap();

    let job = job_repo::enqueue(&db_a, "u1", "r1", job_repo::DEFAULT_JOB_TYPE, 3).unwrap();

    let claimed = job_repo::claim_next(&db_a).unwrap().unwrap();
    assert_eq!(claimed.id, job.id);

    // Requeue with a delay in the past so it is immediately eligible again.
    job_repo::retry_or_fail(&db_a, &job.id, "boom", -10).unwrap();

    // The floor pushes run_after at least 5s out, so nothing is eligible yet.
    assert!(job_repo::claim_next(&db_b).unwrap().is_none());

    let row = job_repo::find_by_id(&db_b, &job.id).unwrap().unwrap();
    assert_eq!(row.status, "queued");
    assert_eq!(row.attempts, 1);
    assert_eq!(row.last_error, "boom");
}
