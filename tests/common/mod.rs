//! Shared test doubles for the pipeline integration tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use fiscus::error::ProcessError;
use fiscus::extract::{GenerativeClient, Message, ModelError};
use fiscus::TextExtractor;

/// OCR double that returns a fixed text for any input.
pub struct FixedOcr {
    text: String,
}

impl FixedOcr {
    pub fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
        })
    }
}

#[async_trait]
impl TextExtractor for FixedOcr {
    async fn extract_text(&self, _bytes: &[u8]) -> Result<String, ProcessError> {
        Ok(self.text.clone())
    }
}

/// OCR double that always fails, for retry-path tests.
pub struct FailingOcr;

#[async_trait]
impl TextExtractor for FailingOcr {
    async fn extract_text(&self, _bytes: &[u8]) -> Result<String, ProcessError> {
        Err(ProcessError::OcrFailed {
            code: 1,
            stderr: "engine crashed".to_string(),
        })
    }
}

/// Model double that returns scripted responses in call order, repeating
/// the last one when the script runs out.
pub struct ScriptedModel {
    responses: Vec<String>,
    calls: Mutex<usize>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            responses: responses.into_iter().map(String::from).collect(),
            calls: Mutex::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl GenerativeClient for ScriptedModel {
    async fn generate(&self, _model: &str, _messages: &[Message]) -> Result<String, ModelError> {
        if self.responses.is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        let mut calls = self.calls.lock().unwrap();
        let index = (*calls).min(self.responses.len() - 1);
        *calls += 1;
        Ok(self.responses[index].clone())
    }
}
