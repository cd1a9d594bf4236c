//! End-to-end pipeline tests: enqueue, claim, process, reconcile, link.
//!
//! The model and OCR engine are scripted doubles; storage and the
//! database are real (tempdir-backed file store, in-memory SQLite).

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use common::{FailingOcr, FixedOcr, ScriptedModel};
use fiscus::db::{job_repo, receipt_repo, record_repo, Database};
use fiscus::extract::FieldExtractor;
use fiscus::reconcile::ReconcileOptions;
use fiscus::storage::FsObjectStore;
use fiscus::{JobScheduler, Pipeline, TextExtractor};

const CANDIDATE: &str = r#"{
    "date": "2026-02-20",
    "source": "Corner Grocery",
    "subAmount": 10.0,
    "amount": 10.8,
    "taxAmount": 0.8,
    "payMethod": "Credit Card",
    "category": "Groceries",
    "items": [{"name": "Milk", "price": 4.0}, {"name": "Bread", "price": 6.0}]
}"#;

struct Rig {
    db: Database,
    scheduler: JobScheduler,
    _storage: tempfile::TempDir,
}

fn rig(ocr: Arc<dyn TextExtractor>, model: Arc<ScriptedModel>, keep_files: bool) -> Rig {
    rig_with_window(ocr, model, keep_files, 5000)
}

fn rig_with_window(
    ocr: Arc<dyn TextExtractor>,
    model: Arc<ScriptedModel>,
    keep_files: bool,
    max_window_chars: usize,
) -> Rig {
    let db = Database::open_in_memory().unwrap();
    let storage = tempfile::tempdir().unwrap();
    let store = Arc::new(FsObjectStore::new(storage.path()));

    let extractor = FieldExtractor::new(
        model,
        "test-model".to_string(),
        max_window_chars,
        2,
        Duration::from_millis(1),
    );
    let pipeline = Arc::new(Pipeline::new(
        db.clone(),
        store,
        ocr,
        extractor,
        ReconcileOptions::default(),
        keep_files,
    ));
    let scheduler = JobScheduler::new(db.clone(), pipeline, Duration::from_millis(500), 20);

    Rig {
        db,
        scheduler,
        _storage: storage,
    }
}

fn stored_receipt(rig: &Rig, object_key: Option<&str>, file_saved: bool) -> String {
    if let Some(key) = object_key {
        std::fs::write(rig._storage.path().join(key), b"file bytes").unwrap();
    }
    let receipt = receipt_repo::ReceiptRow::new_pending(
        "u1",
        object_key.map(String::from),
        file_saved,
    );
    receipt_repo::insert(&rig.db, &receipt).unwrap();
    receipt.id
}

fn enqueue(rig: &Rig, receipt_id: &str, max_attempts: u32) {
    job_repo::enqueue(&rig.db, "u1", receipt_id, job_repo::DEFAULT_JOB_TYPE, max_attempts)
        .unwrap();
}

#[tokio::test]
async fn test_full_run_processes_receipt_and_creates_record() {
    let rig = rig(
        FixedOcr::new("CORNER GROCERY\nTOTAL $10.80\nVISA ****1234"),
        ScriptedModel::new(vec![CANDIDATE]),
        true,
    );
    let receipt_id = stored_receipt(&rig, Some("r1.pdf"), true);
    enqueue(&rig, &receipt_id, 3);

    assert!(rig.scheduler.work_once().await.unwrap());

    let receipt = receipt_repo::find_by_id(&rig.db, "u1", &receipt_id)
        .unwrap()
        .unwrap();
    assert_eq!(receipt.processing_status, "processed");
    assert_eq!(receipt.processing_stage, "completed");
    assert_eq!(receipt.processing_error, "");
    assert_eq!(receipt.amount, 10.8);
    assert_eq!(receipt.source, "Corner Grocery");
    assert_eq!(receipt.date, "2026-02-20");
    assert_eq!(receipt.pay_method, "Credit Card");
    assert!(receipt.raw_ocr_text.contains("CORNER GROCERY"));

    let payload: Value = serde_json::from_str(receipt.parsed_data.as_deref().unwrap()).unwrap();
    assert_eq!(payload["_meta"]["modelVersion"], "test-model");
    assert_eq!(payload["subAmount"], 10.0);

    let record_id = receipt.linked_record_id.expect("record linked");
    let record = record_repo::find_by_id(&rig.db, "u1", &record_id)
        .unwrap()
        .unwrap();
    assert_eq!(record.amount, 10.8);
    assert_eq!(record.category, "Groceries");
    assert_eq!(record.note, "Corner Grocery");

    let job_count = job_repo::count_by_status(&rig.db, "succeeded").unwrap();
    assert_eq!(job_count, 1);

    // keep_files=true: the stored object survives processing.
    assert!(rig._storage.path().join("r1.pdf").exists());
}

#[tokio::test]
async fn test_reprocessing_updates_same_record() {
    let rig = rig(
        FixedOcr::new("CORNER GROCERY\nTOTAL $10.80"),
        ScriptedModel::new(vec![CANDIDATE]),
        true,
    );
    let receipt_id = stored_receipt(&rig, Some("r1.pdf"), true);

    enqueue(&rig, &receipt_id, 3);
    assert!(rig.scheduler.work_once().await.unwrap());
    let first = receipt_repo::find_by_id(&rig.db, "u1", &receipt_id)
        .unwrap()
        .unwrap();
    let record_id = first.linked_record_id.clone().unwrap();

    // Re-enqueue (e.g., after a manual correction) and run again.
    enqueue(&rig, &receipt_id, 3);
    assert!(rig.scheduler.work_once().await.unwrap());

    let second = receipt_repo::find_by_id(&rig.db, "u1", &receipt_id)
        .unwrap()
        .unwrap();
    assert_eq!(second.linked_record_id.as_deref(), Some(record_id.as_str()));

    // Exactly one record exists for this receipt.
    let count = rig
        .db
        .with_conn(|conn| {
            let n: u64 = conn.query_row(
                "SELECT COUNT(*) FROM records WHERE linked_receipt_id = ?1",
                [&receipt_id],
                |r| r.get(0),
            )?;
            Ok(n)
        })
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_zero_amount_never_touches_records() {
    let rig = rig(
        FixedOcr::new("BLANK PAGE WITH SOME TEXT"),
        ScriptedModel::new(vec![r#"{"source": "Somewhere", "amount": 0, "items": []}"#]),
        true,
    );
    let receipt_id = stored_receipt(&rig, Some("r1.pdf"), true);
    enqueue(&rig, &receipt_id, 3);

    assert!(rig.scheduler.work_once().await.unwrap());

    let receipt = receipt_repo::find_by_id(&rig.db, "u1", &receipt_id)
        .unwrap()
        .unwrap();
    assert_eq!(receipt.processing_status, "processed");
    assert!(receipt.linked_record_id.is_none());
    assert!(receipt.parse_warnings.contains("amount_zero"));

    let count = rig
        .db
        .with_conn(|conn| {
            let n: u64 = conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?;
            Ok(n)
        })
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_scan_only_receipt_skips_storage_and_ocr() {
    // FailingOcr proves OCR is never invoked for scan-only receipts.
    let rig = rig(
        Arc::new(FailingOcr),
        ScriptedModel::new(vec![CANDIDATE]),
        true,
    );
    let receipt_id = stored_receipt(&rig, None, false);
    receipt_repo::update_fields(
        &rig.db,
        "u1",
        &receipt_id,
        &receipt_repo::ReceiptPatch {
            ocr_text: Some("CORNER GROCERY TOTAL $10.80".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    enqueue(&rig, &receipt_id, 3);

    assert!(rig.scheduler.work_once().await.unwrap());

    let receipt = receipt_repo::find_by_id(&rig.db, "u1", &receipt_id)
        .unwrap()
        .unwrap();
    assert_eq!(receipt.processing_status, "processed");
    assert_eq!(receipt.amount, 10.8);
    assert_eq!(receipt.raw_ocr_text, "CORNER GROCERY TOTAL $10.80");
}

#[tokio::test]
async fn test_missing_upload_fails_and_requeues() {
    let rig = rig(
        FixedOcr::new("irrelevant"),
        ScriptedModel::new(vec![CANDIDATE]),
        true,
    );
    // file_saved but no object written to storage.
    let receipt_id = stored_receipt(&rig, None, true);
    enqueue(&rig, &receipt_id, 3);

    assert!(rig.scheduler.work_once().await.unwrap());

    let receipt = receipt_repo::find_by_id(&rig.db, "u1", &receipt_id)
        .unwrap()
        .unwrap();
    assert_eq!(receipt.processing_status, "failed");
    assert_eq!(receipt.processing_stage, "failed");
    assert!(!receipt.processing_error.is_empty());

    // First failure of three: back in the queue behind the retry delay.
    let job_count = job_repo::count_by_status(&rig.db, "queued").unwrap();
    assert_eq!(job_count, 1);
}

#[tokio::test]
async fn test_exhausted_attempts_fail_permanently() {
    let rig = rig(
        Arc::new(FailingOcr),
        ScriptedModel::new(vec![CANDIDATE]),
        true,
    );
    let receipt_id = stored_receipt(&rig, Some("r1.pdf"), true);
    enqueue(&rig, &receipt_id, 1);

    assert!(rig.scheduler.work_once().await.unwrap());

    let receipt = receipt_repo::find_by_id(&rig.db, "u1", &receipt_id)
        .unwrap()
        .unwrap();
    assert_eq!(receipt.processing_status, "failed");
    assert!(receipt.processing_error.contains("engine crashed"));

    assert_eq!(job_repo::count_by_status(&rig.db, "failed").unwrap(), 1);
    assert_eq!(job_repo::count_by_status(&rig.db, "queued").unwrap(), 0);
}

#[tokio::test]
async fn test_trivial_ocr_text_skips_the_model() {
    let model = ScriptedModel::new(vec![CANDIDATE]);
    let rig = rig(FixedOcr::new("  a  "), model.clone(), true);
    let receipt_id = stored_receipt(&rig, Some("r1.pdf"), true);
    enqueue(&rig, &receipt_id, 3);

    assert!(rig.scheduler.work_once().await.unwrap());

    assert_eq!(model.call_count(), 0, "model consulted for trivial text");
    let receipt = receipt_repo::find_by_id(&rig.db, "u1", &receipt_id)
        .unwrap()
        .unwrap();
    assert_eq!(receipt.processing_status, "processed");
    assert_eq!(receipt.amount, 0.0);
    assert!(receipt.parse_warnings.contains("ocr_text_too_short"));
}

#[tokio::test]
async fn test_multi_window_selects_best_candidate() {
    // Long OCR text forces three windows; only the second (middle) window
    // produces a usable candidate.
    let model = ScriptedModel::new(vec![
        r#"{"source": "", "amount": 0}"#,
        CANDIDATE,
        r#"{"source": "", "amount": 0}"#,
    ]);
    let long_text = "x".repeat(120);
    let rig = rig_with_window(FixedOcr::new(&long_text), model.clone(), true, 40);
    let receipt_id = stored_receipt(&rig, Some("r1.pdf"), true);
    enqueue(&rig, &receipt_id, 3);

    assert!(rig.scheduler.work_once().await.unwrap());

    assert_eq!(model.call_count(), 3);
    let receipt = receipt_repo::find_by_id(&rig.db, "u1", &receipt_id)
        .unwrap()
        .unwrap();
    assert_eq!(receipt.amount, 10.8);
    assert_eq!(receipt.source, "Corner Grocery");
}

#[tokio::test]
async fn test_retention_policy_deletes_processed_file() {
    let rig = rig(
        FixedOcr::new("CORNER GROCERY TOTAL $10.80"),
        ScriptedModel::new(vec![CANDIDATE]),
        false,
    );
    let receipt_id = stored_receipt(&rig, Some("r1.pdf"), true);
    enqueue(&rig, &receipt_id, 3);

    assert!(rig.scheduler.work_once().await.unwrap());

    let receipt = receipt_repo::find_by_id(&rig.db, "u1", &receipt_id)
        .unwrap()
        .unwrap();
    assert_eq!(receipt.processing_status, "processed");
    assert!(!rig._storage.path().join("r1.pdf").exists());
}

#[tokio::test]
async fn test_empty_queue_is_a_quiet_tick() {
    let rig = rig(
        FixedOcr::new("text"),
        ScriptedModel::new(vec![CANDIDATE]),
        true,
    );
    assert!(!rig.scheduler.work_once().await.unwrap());
}
