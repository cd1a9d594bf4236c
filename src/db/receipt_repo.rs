//! Receipt repository: CRUD operations for the `receipts` table.
//!
//! The pipeline mutates receipts exclusively through `update_fields`,
//! which persists only the fields present in the patch. That keeps each
//! stage transition a single small UPDATE, observable mid-flight.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_rfc3339, Database, DatabaseError};

/// A raw receipt row from the database.
#[derive(Debug, Clone)]
pub struct ReceiptRow {
    pub id: String,
    pub owner_id: String,
    pub object_key: Option<String>,
    pub file_saved: bool,
    pub ocr_text: String,
    pub raw_ocr_text: String,
    pub date: String,
    pub source: String,
    pub sub_amount: f64,
    pub amount: f64,
    pub tax_amount: f64,
    pub pay_method: String,
    /// JSON-encoded line items.
    pub items: String,
    /// JSON-encoded normalized payload plus metadata.
    pub parsed_data: Option<String>,
    pub ai_model_version: String,
    pub parse_confidence: f64,
    /// JSON-encoded warning code list.
    pub parse_warnings: String,
    pub processing_status: String,
    pub processing_stage: String,
    pub processing_error: String,
    pub linked_record_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ReceiptRow {
    /// A fresh receipt in `pending` state, as created at upload confirmation.
    pub fn new_pending(owner_id: &str, object_key: Option<String>, file_saved: bool) -> Self {
        let now = now_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            object_key,
            file_saved,
            ocr_text: String::new(),
            raw_ocr_text: String::new(),
            date: String::new(),
            source: String::new(),
            sub_amount: 0.0,
            amount: 0.0,
            tax_amount: 0.0,
            pay_method: "Other".to_string(),
            items: "[]".to_string(),
            parsed_data: None,
            ai_model_version: String::new(),
            parse_confidence: 0.0,
            parse_warnings: "[]".to_string(),
            processing_status: "pending".to_string(),
            processing_stage: String::new(),
            processing_error: String::new(),
            linked_record_id: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            object_key: row.get("object_key")?,
            file_saved: row.get("file_saved")?,
            ocr_text: row.get("ocr_text")?,
            raw_ocr_text: row.get("raw_ocr_text")?,
            date: row.get("date")?,
            source: row.get("source")?,
            sub_amount: row.get("sub_amount")?,
            amount: row.get("amount")?,
            tax_amount: row.get("tax_amount")?,
            pay_method: row.get("pay_method")?,
            items: row.get("items")?,
            parsed_data: row.get("parsed_data")?,
            ai_model_version: row.get("ai_model_version")?,
            parse_confidence: row.get("parse_confidence")?,
            parse_warnings: row.get("parse_warnings")?,
            processing_status: row.get("processing_status")?,
            processing_stage: row.get("processing_stage")?,
            processing_error: row.get("processing_error")?,
            linked_record_id: row.get("linked_record_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Partial update of a receipt. `None` fields are left untouched.
#[derive(Debug, Default, Clone)]
pub struct ReceiptPatch {
    pub ocr_text: Option<String>,
    pub raw_ocr_text: Option<String>,
    pub date: Option<String>,
    pub source: Option<String>,
    pub sub_amount: Option<f64>,
    pub amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub pay_method: Option<String>,
    pub items: Option<String>,
    pub parsed_data: Option<String>,
    pub ai_model_version: Option<String>,
    pub parse_confidence: Option<f64>,
    pub parse_warnings: Option<String>,
    pub processing_status: Option<String>,
    pub processing_stage: Option<String>,
    pub processing_error: Option<String>,
    pub linked_record_id: Option<String>,
}

/// Inserts a new receipt row.
pub fn insert(db: &Database, receipt: &ReceiptRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO receipts (
                 id, owner_id, object_key, file_saved, ocr_text, raw_ocr_text, date, source,
                 sub_amount, amount, tax_amount, pay_method, items, parsed_data,
                 ai_model_version, parse_confidence, parse_warnings, processing_status,
                 processing_stage, processing_error, linked_record_id, created_at, updated_at
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            params![
                receipt.id,
                receipt.owner_id,
                receipt.object_key,
                receipt.file_saved,
                receipt.ocr_text,
                receipt.raw_ocr_text,
                receipt.date,
                receipt.source,
                receipt.sub_amount,
                receipt.amount,
                receipt.tax_amount,
                receipt.pay_method,
                receipt.items,
                receipt.parsed_data,
                receipt.ai_model_version,
                receipt.parse_confidence,
                receipt.parse_warnings,
                receipt.processing_status,
                receipt.processing_stage,
                receipt.processing_error,
                receipt.linked_record_id,
                receipt.created_at,
                receipt.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a receipt by owner and id.
pub fn find_by_id(
    db: &Database,
    owner_id: &str,
    id: &str,
) -> Result<Option<ReceiptRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM receipts WHERE id = ?1 AND owner_id = ?2",
                params![id, owner_id],
                ReceiptRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Applies a partial update, returning the updated row.
pub fn update_fields(
    db: &Database,
    owner_id: &str,
    id: &str,
    patch: &ReceiptPatch,
) -> Result<Option<ReceiptRow>, DatabaseError> {
    let mut assignments = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    macro_rules! set_field {
        ($field:ident, $column:expr) => {
            if let Some(ref value) = patch.$field {
                param_values.push(Box::new(value.clone()));
                assignments.push(format!("{} = ?{}", $column, param_values.len()));
            }
        };
    }

    set_field!(ocr_text, "ocr_text");
    set_field!(raw_ocr_text, "raw_ocr_text");
    set_field!(date, "date");
    set_field!(source, "source");
    set_field!(sub_amount, "sub_amount");
    set_field!(amount, "amount");
    set_field!(tax_amount, "tax_amount");
    set_field!(pay_method, "pay_method");
    set_field!(items, "items");
    set_field!(parsed_data, "parsed_data");
    set_field!(ai_model_version, "ai_model_version");
    set_field!(parse_confidence, "parse_confidence");
    set_field!(parse_warnings, "parse_warnings");
    set_field!(processing_status, "processing_status");
    set_field!(processing_stage, "processing_stage");
    set_field!(processing_error, "processing_error");
    set_field!(linked_record_id, "linked_record_id");

    param_values.push(Box::new(now_rfc3339()));
    assignments.push(format!("updated_at = ?{}", param_values.len()));

    param_values.push(Box::new(id.to_string()));
    let id_pos = param_values.len();
    param_values.push(Box::new(owner_id.to_string()));
    let owner_pos = param_values.len();

    let sql = format!(
        "UPDATE receipts SET {} WHERE id = ?{} AND owner_id = ?{} RETURNING *",
        assignments.join(", "),
        id_pos,
        owner_pos
    );

    db.with_conn(|conn| {
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let row = conn
            .query_row(&sql, params_ref.as_slice(), ReceiptRow::from_row)
            .optional()?;
        Ok(row)
    })
}
