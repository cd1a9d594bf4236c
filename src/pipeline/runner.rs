//! The processing orchestrator.
//!
//! Drives one claimed job through the stage sequence, persisting every
//! transition on the receipt before the next stage begins. Any error
//! returned here fails the current attempt; the worker loop records it
//! and lets the job store decide between retry and permanent failure.

use std::sync::Arc;

use log::warn;
use serde_json::json;
use tracing::{info_span, Instrument};

use crate::db::job_repo::JobRow;
use crate::db::receipt_repo::{self, ReceiptPatch, ReceiptRow};
use crate::db::Database;
use crate::extract::{FieldExtractor, TextExtractor};
use crate::reconcile::{self, meaningful_len, ReconcileOptions};
use crate::storage::ObjectStore;

use super::error::PipelineError;
use super::linkage::link_record;
use super::stage::ProcessingStage;

/// Minimum meaningful characters of OCR text before the extraction model
/// is consulted at all.
const MIN_TEXT_FOR_EXTRACTION: usize = 5;

/// Orchestrates processing for one receipt at a time.
pub struct Pipeline {
    db: Database,
    store: Arc<dyn ObjectStore>,
    ocr: Arc<dyn TextExtractor>,
    extractor: FieldExtractor,
    options: ReconcileOptions,
    keep_receipt_files: bool,
}

impl Pipeline {
    pub fn new(
        db: Database,
        store: Arc<dyn ObjectStore>,
        ocr: Arc<dyn TextExtractor>,
        extractor: FieldExtractor,
        options: ReconcileOptions,
        keep_receipt_files: bool,
    ) -> Self {
        Self {
            db,
            store,
            ocr,
            extractor,
            options,
            keep_receipt_files,
        }
    }

    /// Applies a patch to the receipt, treating disappearance mid-flight
    /// as a hard error.
    fn patch(
        &self,
        owner_id: &str,
        receipt_id: &str,
        patch: &ReceiptPatch,
    ) -> Result<ReceiptRow, PipelineError> {
        receipt_repo::update_fields(&self.db, owner_id, receipt_id, patch)?
            .ok_or_else(|| PipelineError::ReceiptNotFound(receipt_id.to_string()))
    }

    fn set_stage(
        &self,
        owner_id: &str,
        receipt_id: &str,
        stage: ProcessingStage,
    ) -> Result<ReceiptRow, PipelineError> {
        self.patch(
            owner_id,
            receipt_id,
            &ReceiptPatch {
                processing_stage: Some(stage.as_str().to_string()),
                ..Default::default()
            },
        )
    }

    /// Processes one claimed job end to end.
    pub async fn process(&self, job: &JobRow) -> Result<(), PipelineError> {
        let span = info_span!("pipeline.process", receipt_id = %job.receipt_id);
        self.process_inner(job).instrument(span).await
    }

    async fn process_inner(&self, job: &JobRow) -> Result<(), PipelineError> {
        let owner_id = &job.owner_id;
        let receipt_id = &job.receipt_id;

        let receipt = receipt_repo::find_by_id(&self.db, owner_id, receipt_id)?
            .ok_or_else(|| PipelineError::ReceiptNotFound(receipt_id.to_string()))?;

        self.patch(
            owner_id,
            receipt_id,
            &ReceiptPatch {
                processing_status: Some("processing".to_string()),
                processing_stage: Some(ProcessingStage::VerifyingUpload.as_str().to_string()),
                processing_error: Some(String::new()),
                ai_model_version: Some(self.extractor.model().to_string()),
                ..Default::default()
            },
        )?;

        if receipt.file_saved {
            let key = receipt.object_key.as_deref().unwrap_or_default();
            if key.is_empty() || !self.store.head(key).await? {
                return Err(PipelineError::UploadNotFound {
                    receipt_id: receipt_id.clone(),
                    key: key.to_string(),
                });
            }
        }

        // Scan-only receipts keep whatever OCR text was stored at upload;
        // everything else goes through the OCR engine.
        let ocr_text = if receipt.file_saved {
            self.set_stage(owner_id, receipt_id, ProcessingStage::ExtractingText)?;
            let key = receipt.object_key.as_deref().unwrap_or_default();
            let bytes = self.store.fetch(key).await?;
            self.ocr.extract_text(&bytes).await?
        } else {
            receipt.ocr_text.clone()
        };

        // Raw text is persisted before parsing so a later re-run can skip
        // straight to extraction.
        self.patch(
            owner_id,
            receipt_id,
            &ReceiptPatch {
                ocr_text: Some(ocr_text.clone()),
                raw_ocr_text: Some(ocr_text.clone()),
                processing_stage: Some(ProcessingStage::ParsingAi.as_str().to_string()),
                ..Default::default()
            },
        )?;

        let candidate = if meaningful_len(&ocr_text) > MIN_TEXT_FOR_EXTRACTION {
            self.extractor.extract(&ocr_text).await
        } else {
            None
        };

        let assessment =
            reconcile::assess(&candidate.unwrap_or_else(|| json!({})), &ocr_text, &self.options);
        let payload = reconcile::build_payload(&assessment, self.extractor.model());

        let normalized = &assessment.normalized;
        let receipt = self.patch(
            owner_id,
            receipt_id,
            &ReceiptPatch {
                date: Some(normalized.date.clone()),
                source: Some(normalized.source.clone()),
                sub_amount: Some(normalized.sub_amount),
                amount: Some(normalized.amount),
                tax_amount: Some(normalized.tax_amount),
                pay_method: Some(normalized.pay_method.as_str().to_string()),
                items: Some(encode_json(&normalized.items, "items")?),
                parsed_data: Some(encode_json(&payload, "parsed_data")?),
                parse_confidence: Some(assessment.confidence),
                parse_warnings: Some(encode_json(&assessment.warnings, "parse_warnings")?),
                processing_stage: Some(ProcessingStage::UpdatingRecords.as_str().to_string()),
                ..Default::default()
            },
        )?;

        if let Some(record_id) = link_record(&self.db, &receipt, &assessment)? {
            if receipt.linked_record_id.as_deref() != Some(record_id.as_str()) {
                self.patch(
                    owner_id,
                    receipt_id,
                    &ReceiptPatch {
                        linked_record_id: Some(record_id),
                        ..Default::default()
                    },
                )?;
            }
        }

        // Retention policy "do not keep": delete the stored object,
        // best-effort only.
        if !self.keep_receipt_files && receipt.file_saved {
            if let Some(key) = receipt.object_key.as_deref() {
                if let Err(err) = self.store.delete(key).await {
                    warn!("Failed to delete receipt object '{}': {}", key, err);
                }
            }
        }

        self.patch(
            owner_id,
            receipt_id,
            &ReceiptPatch {
                processing_status: Some("processed".to_string()),
                processing_stage: Some(ProcessingStage::Completed.as_str().to_string()),
                processing_error: Some(String::new()),
                ..Default::default()
            },
        )?;

        Ok(())
    }
}

fn encode_json<T: serde::Serialize>(value: &T, column: &str) -> Result<String, PipelineError> {
    serde_json::to_string(value).map_err(|e| {
        PipelineError::Database(crate::db::DatabaseError::CorruptJson {
            column: column.to_string(),
            reason: e.to_string(),
        })
    })
}
