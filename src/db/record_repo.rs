//! Ledger record repository.
//!
//! The pipeline only ever creates or updates the single record a receipt
//! owns (tracked by `receipts.linked_record_id`); everything else about
//! ledger records belongs to the surrounding application.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_rfc3339, Database, DatabaseError};

/// A ledger record row.
#[derive(Debug, Clone)]
pub struct RecordRow {
    pub id: String,
    pub owner_id: String,
    pub record_type: String,
    pub amount: f64,
    pub category: String,
    pub date: String,
    pub note: String,
    pub linked_receipt_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            record_type: row.get("record_type")?,
            amount: row.get("amount")?,
            category: row.get("category")?,
            date: row.get("date")?,
            note: row.get("note")?,
            linked_receipt_id: row.get("linked_receipt_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Fields written when creating or updating the linked record.
#[derive(Debug, Clone)]
pub struct RecordFields {
    pub amount: f64,
    pub category: String,
    pub date: String,
    pub note: String,
}

/// Creates a new expense record linked to a receipt, returning it.
pub fn create(
    db: &Database,
    owner_id: &str,
    fields: &RecordFields,
    linked_receipt_id: &str,
) -> Result<RecordRow, DatabaseError> {
    let now = now_rfc3339();
    let id = uuid::Uuid::new_v4().to_string();
    db.with_conn(|conn| {
        let row = conn.query_row(
            "INSERT INTO records (
                 id, owner_id, record_type, amount, category, date, note,
                 linked_receipt_id, created_at, updated_at
             )
             VALUES (?1, ?2, 'expense', ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             RETURNING *",
            params![
                id,
                owner_id,
                fields.amount,
                fields.category,
                fields.date,
                fields.note,
                linked_receipt_id,
                now
            ],
            RecordRow::from_row,
        )?;
        Ok(row)
    })
}

/// Updates the amount/date/category/note of an existing record in place.
pub fn update(
    db: &Database,
    owner_id: &str,
    id: &str,
    fields: &RecordFields,
) -> Result<Option<RecordRow>, DatabaseError> {
    let now = now_rfc3339();
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "UPDATE records SET
                     amount = ?3, category = ?4, date = ?5, note = ?6, updated_at = ?7
                 WHERE id = ?1 AND owner_id = ?2
                 RETURNING *",
                params![
                    id,
                    owner_id,
                    fields.amount,
                    fields.category,
                    fields.date,
                    fields.note,
                    now
                ],
                RecordRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Finds a record by owner and id.
pub fn find_by_id(
    db: &Database,
    owner_id: &str,
    id: &str,
) -> Result<Option<RecordRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM records WHERE id = ?1 AND owner_id = ?2",
                params![id, owner_id],
                RecordRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}
