//! Reconciliation engine.
//!
//! Pure and deterministic: takes the raw candidate the extraction model
//! produced (as loose JSON) plus the OCR text, and returns a normalized,
//! internally-consistent payload with warning codes and a confidence
//! score. Nothing in here is ever fatal; malformed input degrades to
//! defaults plus warnings.

use chrono::{Duration, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const MAX_SOURCE_CHARS: usize = 140;
const MAX_ITEM_NAME_CHARS: usize = 120;
const ITEM_SUBTOTAL_TOLERANCE: f64 = 1.0;
const MIN_MEANINGFUL_OCR_CHARS: usize = 5;

/// Closed set of payment methods. Anything else maps to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayMethod {
    Cash,
    Check,
    #[serde(rename = "Credit Card")]
    CreditCard,
    #[serde(rename = "Debit Card")]
    DebitCard,
    #[serde(rename = "Gift Card")]
    GiftCard,
    Multiple,
    Other,
}

impl PayMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Cash" => Some(Self::Cash),
            "Check" => Some(Self::Check),
            "Credit Card" => Some(Self::CreditCard),
            "Debit Card" => Some(Self::DebitCard),
            "Gift Card" => Some(Self::GiftCard),
            "Multiple" => Some(Self::Multiple),
            "Other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "Cash",
            Self::Check => "Check",
            Self::CreditCard => "Credit Card",
            Self::DebitCard => "Debit Card",
            Self::GiftCard => "Gift Card",
            Self::Multiple => "Multiple",
            Self::Other => "Other",
        }
    }
}

/// Closed set of expense categories. Anything else maps to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Housing,
    Utilities,
    Groceries,
    Transportation,
    Dining,
    Health,
    Entertainment,
    Shopping,
    Membership,
    Miscellaneous,
    Education,
    Giving,
    Savings,
    Other,
}

impl Category {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Housing" => Some(Self::Housing),
            "Utilities" => Some(Self::Utilities),
            "Groceries" => Some(Self::Groceries),
            "Transportation" => Some(Self::Transportation),
            "Dining" => Some(Self::Dining),
            "Health" => Some(Self::Health),
            "Entertainment" => Some(Self::Entertainment),
            "Shopping" => Some(Self::Shopping),
            "Membership" => Some(Self::Membership),
            "Miscellaneous" => Some(Self::Miscellaneous),
            "Education" => Some(Self::Education),
            "Giving" => Some(Self::Giving),
            "Savings" => Some(Self::Savings),
            "Other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Housing => "Housing",
            Self::Utilities => "Utilities",
            Self::Groceries => "Groceries",
            Self::Transportation => "Transportation",
            Self::Dining => "Dining",
            Self::Health => "Health",
            Self::Entertainment => "Entertainment",
            Self::Shopping => "Shopping",
            Self::Membership => "Membership",
            Self::Miscellaneous => "Miscellaneous",
            Self::Education => "Education",
            Self::Giving => "Giving",
            Self::Savings => "Savings",
            Self::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub price: f64,
}

/// The normalized receipt shape written back onto the Receipt and into
/// the parsed payload. Field names match the persisted payload format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedReceipt {
    pub date: String,
    pub source: String,
    pub sub_amount: f64,
    pub amount: f64,
    pub tax_amount: f64,
    pub pay_method: PayMethod,
    pub category: Category,
    pub items: Vec<LineItem>,
}

/// Metadata stored alongside the normalized payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMeta {
    pub model_version: String,
    pub parse_confidence: f64,
    pub parse_warnings: Vec<String>,
    pub parsed_at: String,
}

/// The payload persisted in `receipts.parsed_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedPayload {
    #[serde(flatten)]
    pub receipt: NormalizedReceipt,
    #[serde(rename = "_meta")]
    pub meta: PayloadMeta,
}

/// Confidence scoring knobs.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub base_confidence: f64,
    pub warning_penalty: f64,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            base_confidence: 0.96,
            warning_penalty: 0.1,
        }
    }
}

/// Result of reconciling one candidate.
#[derive(Debug, Clone)]
pub struct Assessment {
    pub normalized: NormalizedReceipt,
    pub confidence: f64,
    pub warnings: Vec<String>,
    pub parsed_date: Option<NaiveDate>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Trims and clamps a free-text field to a character budget.
fn normalize_text(value: &str, max_chars: usize) -> String {
    value.trim().chars().take(max_chars).collect()
}

/// Number of non-whitespace characters; the "is there any real text"
/// check used both by the orchestrator and the post-checks here.
pub fn meaningful_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Coerces a loose JSON value into a non-negative two-decimal amount.
/// Currency symbols, commas, and whitespace are stripped from strings.
fn parse_amount(raw: &Value, field: &str, warnings: &mut Vec<String>) -> f64 {
    let num = match raw {
        Value::Null => return 0.0,
        Value::Number(n) => match n.as_f64() {
            Some(v) if v.is_finite() => v,
            _ => {
                warnings.push(format!("{field}_not_numeric"));
                return 0.0;
            }
        },
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
                .collect();
            if cleaned.is_empty() {
                return 0.0;
            }
            match cleaned.parse::<f64>() {
                Ok(v) if v.is_finite() => v,
                _ => {
                    warnings.push(format!("{field}_not_numeric"));
                    return 0.0;
                }
            }
        }
        _ => {
            warnings.push(format!("{field}_not_numeric"));
            return 0.0;
        }
    };

    if num < 0.0 {
        warnings.push(format!("{field}_negative"));
        return 0.0;
    }
    round2(num)
}

fn str_field<'a>(parsed: &'a Value, key: &str) -> &'a str {
    parsed.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Input stage: whitelists enumerations and coerces every field of a raw
/// candidate, recording warnings for anything invalid or missing.
fn clamp_candidate(parsed: &Value, warnings: &mut Vec<String>) -> NormalizedReceipt {
    let source = normalize_text(str_field(parsed, "source"), MAX_SOURCE_CHARS);
    if source.is_empty() {
        warnings.push("source_missing".to_string());
    }

    let pay_method = match PayMethod::parse(str_field(parsed, "payMethod")) {
        Some(method) => method,
        None => {
            warnings.push("pay_method_unknown".to_string());
            PayMethod::Other
        }
    };
    let category = match Category::parse(str_field(parsed, "category")) {
        Some(category) => category,
        None => {
            warnings.push("category_unknown".to_string());
            Category::Other
        }
    };

    let null = Value::Null;
    let sub_amount = parse_amount(parsed.get("subAmount").unwrap_or(&null), "sub_amount", warnings);
    let amount = parse_amount(parsed.get("amount").unwrap_or(&null), "amount", warnings);
    let tax_amount = parse_amount(parsed.get("taxAmount").unwrap_or(&null), "tax_amount", warnings);

    let items = parsed
        .get("items")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| LineItem {
                    name: normalize_text(str_field(entry, "name"), MAX_ITEM_NAME_CHARS),
                    price: parse_amount(
                        entry.get("price").unwrap_or(&null),
                        "item_price",
                        warnings,
                    ),
                })
                .filter(|item| !item.name.is_empty() || item.price > 0.0)
                .collect()
        })
        .unwrap_or_default();

    NormalizedReceipt {
        date: String::new(),
        source,
        sub_amount,
        amount,
        tax_amount,
        pay_method,
        category,
        items,
    }
}

/// The same whitelisting/clamping the full assessment applies, without
/// the warning bookkeeping. Used by the field-extraction adapter to
/// validate each window's candidate before scoring it.
pub fn sanitize_candidate(parsed: &Value) -> NormalizedReceipt {
    let mut discard = Vec::new();
    let mut candidate = clamp_candidate(parsed, &mut discard);
    candidate.date = validate_date(str_field(parsed, "date"), &mut discard)
        .map(|d| d.to_string())
        .unwrap_or_default();
    candidate
}

/// Fills in whichever of total/subtotal/tax is missing from the other
/// two. At most one rule fires, in priority order; a rule that would
/// leave the value unchanged is skipped, so reconciling an already
/// consistent payload infers nothing new.
fn reconcile_amounts(normalized: &mut NormalizedReceipt, warnings: &mut Vec<String>) {
    let subtotal = normalized.sub_amount;
    let tax = normalized.tax_amount;
    let total = normalized.amount;

    if total <= 0.0 && subtotal > 0.0 && tax >= 0.0 {
        let inferred = round2(subtotal + tax);
        if inferred != total {
            normalized.amount = inferred;
            warnings.push("amount_inferred_from_subtotal_and_tax".to_string());
            return;
        }
    }
    if subtotal <= 0.0 && total > 0.0 && tax >= 0.0 {
        let inferred = round2((total - tax).max(0.0));
        if inferred != subtotal {
            normalized.sub_amount = inferred;
            warnings.push("subtotal_inferred_from_total_and_tax".to_string());
            return;
        }
    }
    if tax <= 0.0 && total > 0.0 && subtotal > 0.0 {
        let inferred = round2((total - subtotal).max(0.0));
        if inferred != tax {
            normalized.tax_amount = inferred;
            warnings.push("tax_inferred_from_total_and_subtotal".to_string());
        }
    }
}

/// Cross-checks the declared subtotal against the sum of line items.
fn validate_item_totals(normalized: &mut NormalizedReceipt, warnings: &mut Vec<String>) {
    if normalized.items.is_empty() {
        return;
    }
    let item_total = round2(normalized.items.iter().map(|item| item.price).sum());
    if item_total <= 0.0 {
        return;
    }

    if normalized.sub_amount <= 0.0 {
        normalized.sub_amount = item_total;
        warnings.push("subtotal_inferred_from_items".to_string());
        return;
    }

    if (item_total - normalized.sub_amount).abs() > ITEM_SUBTOTAL_TOLERANCE {
        warnings.push("items_subtotal_mismatch".to_string());
    }
}

/// Validates a date string as an ISO calendar date. Returns the parsed
/// date when well-formed; range problems only warn, malformed input
/// warns and yields `None`. Empty input is silent.
fn validate_date(raw: &str, warnings: &mut Vec<String>) -> Option<NaiveDate> {
    if raw.is_empty() {
        return None;
    }

    let well_formed = raw.len() == 10
        && raw.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        });
    let parsed = if well_formed {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
    } else {
        None
    };

    let Some(date) = parsed else {
        warnings.push("date_invalid_format".to_string());
        return None;
    };

    let min = NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid constant date");
    let max = Utc::now().date_naive() + Duration::days(366);
    if date < min || date > max {
        warnings.push("date_out_of_range".to_string());
    }

    Some(date)
}

/// Deduplicates warnings preserving first-occurrence order.
fn dedup_warnings(warnings: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    warnings
        .into_iter()
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Reconciles a raw candidate against the OCR text it came from.
pub fn assess(parsed: &Value, raw_ocr_text: &str, opts: &ReconcileOptions) -> Assessment {
    let mut warnings = Vec::new();

    let mut normalized = clamp_candidate(parsed, &mut warnings);

    reconcile_amounts(&mut normalized, &mut warnings);
    validate_item_totals(&mut normalized, &mut warnings);

    if normalized.amount == 0.0 {
        warnings.push("amount_zero".to_string());
    }
    if normalized.sub_amount > normalized.amount && normalized.amount > 0.0 {
        warnings.push("subtotal_gt_total".to_string());
    }
    if normalized.tax_amount > normalized.amount && normalized.amount > 0.0 {
        warnings.push("tax_gt_total".to_string());
    }

    let parsed_date = validate_date(str_field(parsed, "date"), &mut warnings);
    normalized.date = parsed_date.map(|d| d.to_string()).unwrap_or_default();

    if meaningful_len(raw_ocr_text) <= MIN_MEANINGFUL_OCR_CHARS {
        warnings.push("ocr_text_too_short".to_string());
    }

    let warnings = dedup_warnings(warnings);
    let confidence = round4(opts.base_confidence - warnings.len() as f64 * opts.warning_penalty)
        .clamp(0.2, 0.99);

    Assessment {
        normalized,
        confidence,
        warnings,
        parsed_date,
    }
}

/// Builds the payload persisted on the receipt.
pub fn build_payload(assessment: &Assessment, model_version: &str) -> ParsedPayload {
    ParsedPayload {
        receipt: assessment.normalized.clone(),
        meta: PayloadMeta {
            model_version: model_version.to_string(),
            parse_confidence: assessment.confidence,
            parse_warnings: assessment.warnings.clone(),
            parsed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        },
    }
}
