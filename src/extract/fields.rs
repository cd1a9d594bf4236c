//! Structured field extraction over windows of OCR text.
//!
//! Long OCR text is split into at most three bounded windows (leading,
//! middle for very long text, trailing). Each window is prompted
//! independently and its recovered candidate scored; the best-scoring
//! candidate wins. Everything here degrades to "no candidate" rather
//! than failing the job: a missing candidate just means the receipt is
//! reconciled from nothing, with warnings.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;

use super::client::{GenerativeClient, Message, ModelError};
use super::json_recovery::recover_json;
use crate::reconcile::{sanitize_candidate, NormalizedReceipt};

const PARSE_PROMPT: &str = r#"You are a financial receipt extraction system.

From the receipt text, extract ONLY the following fields:

- date: Purchase date in YYYY-MM-DD format
- source: Store or venue name
- subAmount: Subtotal before tax (number)
- amount: Final total charged including tax (number)
- taxAmount: Tax charged (number)
- payMethod: One of:
    Cash, Check, Credit Card, Debit Card, Gift Card, Multiple, Other
- category: Choose ONE expense category from this exact list:
    Housing, Utilities, Groceries, Transportation, Dining, Health, Entertainment,
    Shopping, Membership, Miscellaneous, Education, Giving, Savings, Other
- items: Array of objects [{ "name": string, "price": number }]

Return JSON ONLY in this exact structure:

{
  "date": "",
  "source": "",
  "subAmount": 0,
  "amount": 0,
  "taxAmount": 0,
  "payMethod": "",
  "category": "",
  "items": []
}

No explanations. No markdown. Only JSON.
"#;

/// Extracts structured receipt fields from OCR text via a generative model.
pub struct FieldExtractor {
    client: Arc<dyn GenerativeClient>,
    model: String,
    max_window_chars: usize,
    min_score: u32,
    retry_delay: Duration,
}

impl FieldExtractor {
    pub fn new(
        client: Arc<dyn GenerativeClient>,
        model: String,
        max_window_chars: usize,
        min_score: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client,
            model,
            max_window_chars: max_window_chars.max(1),
            min_score,
            retry_delay,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Splits text into at most three windows capped at the configured
    /// character budget: the leading slice, a centered middle slice when
    /// the text is longer than two windows, and the trailing slice.
    fn windows(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        let max = self.max_window_chars;

        if n <= max {
            return vec![text.to_string()];
        }

        let mut windows = vec![chars[..max].iter().collect()];
        if n > 2 * max {
            let start = (n - max) / 2;
            windows.push(chars[start..start + max].iter().collect());
        }
        windows.push(chars[n - max..].iter().collect());
        windows
    }

    /// How promising a validated candidate looks. A usable total is worth
    /// the most; everything else is corroboration.
    fn score(candidate: &NormalizedReceipt) -> u32 {
        let mut score = 0;
        if !candidate.source.is_empty() {
            score += 1;
        }
        if candidate.amount > 0.0 {
            score += 3;
        }
        if candidate.sub_amount > 0.0 {
            score += 1;
        }
        if candidate.tax_amount > 0.0 {
            score += 1;
        }
        if !candidate.date.is_empty() {
            score += 1;
        }
        if !candidate.items.is_empty() {
            score += 1;
        }
        score
    }

    /// Prompts the model for one window, retrying once on transient
    /// overload. Errors are reported as `None`; the caller moves on to
    /// the next window.
    async fn prompt_window(&self, window: &str) -> Option<String> {
        let messages = [Message::system(PARSE_PROMPT), Message::user(window.to_string())];

        match self.client.generate(&self.model, &messages).await {
            Ok(raw) => Some(raw),
            Err(err) if err.is_transient() => {
                warn!("Model overloaded, retrying once");
                tokio::time::sleep(self.retry_delay).await;
                match self.client.generate(&self.model, &messages).await {
                    Ok(raw) => Some(raw),
                    Err(err) => {
                        warn!("Extraction window failed after retry: {}", err);
                        None
                    }
                }
            }
            Err(err) => {
                warn!("Extraction window failed: {}", err);
                None
            }
        }
    }

    /// Runs extraction over all windows of `ocr_text` and returns the raw
    /// candidate object of the best-scoring window, or `None` when no
    /// window produced a candidate worth the minimum score.
    pub async fn extract(&self, ocr_text: &str) -> Option<Value> {
        let windows = self.windows(ocr_text);
        debug!("Extracting fields over {} window(s)", windows.len());

        let mut best: Option<(u32, Value)> = None;
        for (index, window) in windows.iter().enumerate() {
            let Some(raw) = self.prompt_window(window).await else {
                continue;
            };
            let Some(candidate) = recover_json(&raw) else {
                debug!("Window {} returned no recoverable JSON", index);
                continue;
            };

            let score = Self::score(&sanitize_candidate(&candidate));
            debug!("Window {} candidate scored {}", index, score);
            // Strictly greater, so earlier windows win ties.
            if best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((score, candidate));
            }
        }

        match best {
            Some((score, candidate)) if score >= self.min_score => Some(candidate),
            _ => None,
        }
    }
}
