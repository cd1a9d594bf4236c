//! Record linkage: one ledger record per receipt.
//!
//! A receipt owns at most one expense record, tracked through
//! `linked_record_id`. Re-processing updates that record in place, so
//! re-running the pipeline never duplicates ledger entries.

use chrono::Utc;
use log::{debug, info};

use crate::db::{record_repo, Database, DatabaseError};
use crate::db::receipt_repo::ReceiptRow;
use crate::reconcile::Assessment;

/// Creates or updates the ledger record for a receipt whose reconciled
/// amount is usable. Returns the id of the linked record, or `None` when
/// the amount is not positive and no record was touched.
pub fn link_record(
    db: &Database,
    receipt: &ReceiptRow,
    assessment: &Assessment,
) -> Result<Option<String>, DatabaseError> {
    let normalized = &assessment.normalized;
    if normalized.amount <= 0.0 {
        debug!("Receipt {} has no usable amount, skipping linkage", receipt.id);
        return Ok(None);
    }

    let fields = record_repo::RecordFields {
        amount: normalized.amount,
        category: normalized.category.as_str().to_string(),
        date: if normalized.date.is_empty() {
            Utc::now().date_naive().to_string()
        } else {
            normalized.date.clone()
        },
        note: if normalized.source.is_empty() {
            "Receipt".to_string()
        } else {
            normalized.source.clone()
        },
    };

    if let Some(record_id) = &receipt.linked_record_id {
        if let Some(updated) = record_repo::update(db, &receipt.owner_id, record_id, &fields)? {
            info!("Updated linked record {} for receipt {}", updated.id, receipt.id);
            return Ok(Some(updated.id));
        }
        // The linked record no longer exists; fall through and relink.
    }

    let record = record_repo::create(db, &receipt.owner_id, &fields, &receipt.id)?;
    info!("Created record {} for receipt {}", record.id, receipt.id);
    Ok(Some(record.id))
}
