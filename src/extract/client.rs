//! Generative model client for field extraction.
//!
//! The adapter only needs "send a prompt, get text back", so the trait is
//! deliberately narrow. The production implementation talks to the Gemini
//! REST API; tests substitute scripted clients.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length for error bodies kept from provider responses.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// One turn of a prompt conversation.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    /// `"system"` or `"user"`.
    pub role: &'static str,
    pub text: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system",
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user",
            text: text.into(),
        }
    }
}

/// Errors from a generation request.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Transient provider overload (HTTP 429/503). Worth one retry.
    #[error("Model overloaded")]
    Overloaded,

    #[error("Model request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Model returned no text")]
    EmptyResponse,
}

impl ModelError {
    /// Whether a single short-delay retry is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::Overloaded)
    }
}

/// Narrow contract over the text-generation provider.
#[async_trait]
pub trait GenerativeClient: Send + Sync {
    /// Sends the messages to the named model and returns the raw text of
    /// the first candidate response.
    async fn generate(&self, model: &str, messages: &[Message]) -> Result<String, ModelError>;
}

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent<'a>>,
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

/// Gemini REST client.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, GEMINI_BASE_URL.to_string())
    }

    /// Points the client at an alternative endpoint. Used by tests.
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }

    fn build_request<'a>(messages: &'a [Message]) -> GeminiRequest<'a> {
        // System turns go into systemInstruction; everything else is a
        // user content entry.
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();
        for message in messages {
            if message.role == "system" {
                system_parts.push(GeminiPart { text: &message.text });
            } else {
                contents.push(GeminiContent {
                    role: Some("user"),
                    parts: vec![GeminiPart { text: &message.text }],
                });
            }
        }

        GeminiRequest {
            system_instruction: if system_parts.is_empty() {
                None
            } else {
                Some(GeminiContent {
                    role: None,
                    parts: system_parts,
                })
            },
            contents,
        }
    }
}

#[async_trait]
impl GenerativeClient for GeminiClient {
    async fn generate(&self, model: &str, messages: &[Message]) -> Result<String, ModelError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        debug!("Sending generation request to model {}", model);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::build_request(messages))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 503 || status.as_u16() == 429 {
            return Err(ModelError::Overloaded);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GeminiResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(text)
    }
}
