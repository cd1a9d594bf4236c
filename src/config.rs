//! Pipeline and scheduler configuration.
//!
//! All policy constants (tick interval, retry delay, extraction score
//! threshold, confidence scoring) live here rather than being hard-coded,
//! so operators can tune them without a rebuild.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// SQLite database path. `None` means the canonical per-user path.
    pub database_path: Option<PathBuf>,

    /// Root directory of the filesystem object store.
    pub storage_root: PathBuf,

    /// Program invoked for OCR. Receives raw file bytes on stdin and must
    /// print `{"text": "..."}` on stdout.
    pub ocr_program: String,
    pub ocr_args: Vec<String>,

    /// Field-extraction model name.
    pub ai_model: String,
    /// API key for the model provider. Falls back to `FISCUS_AI_API_KEY`.
    pub ai_api_key: Option<String>,
    /// Maximum characters per extraction window.
    pub ai_max_chars: usize,
    /// Minimum candidate score required to accept an extraction result.
    pub min_candidate_score: u32,
    /// Delay before the single inline retry after a model overload.
    pub model_retry_delay_ms: u64,

    /// Confidence scoring parameters.
    pub base_confidence: f64,
    pub warning_penalty: f64,

    /// Whether uploaded files are retained after successful processing.
    pub keep_receipt_files: bool,

    /// Scheduler poll interval in milliseconds (floor 500).
    pub tick_interval_ms: u64,
    /// Delay before a failed job becomes claimable again (floor 5s).
    pub retry_delay_seconds: i64,
    /// Attempts before a job is failed permanently.
    pub max_attempts: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            storage_root: PathBuf::from("storage"),
            ocr_program: "python3".to_string(),
            ocr_args: vec!["worker/ocr_worker.py".to_string()],
            ai_model: "gemini-2.5-flash".to_string(),
            ai_api_key: None,
            ai_max_chars: 5000,
            min_candidate_score: 2,
            model_retry_delay_ms: 300,
            base_confidence: 0.96,
            warning_penalty: 0.1,
            keep_receipt_files: true,
            tick_interval_ms: 1500,
            retry_delay_seconds: 20,
            max_attempts: 3,
        }
    }
}

impl ProcessingConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::load_from_str(&content)
    }

    pub fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.base_confidence) {
            return Err(ConfigError::Validation {
                message: format!("base_confidence out of range: {}", self.base_confidence),
            });
        }
        if !(0.0..=1.0).contains(&self.warning_penalty) {
            return Err(ConfigError::Validation {
                message: format!("warning_penalty out of range: {}", self.warning_penalty),
            });
        }
        if self.ai_max_chars == 0 {
            return Err(ConfigError::Validation {
                message: "ai_max_chars must be > 0".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation {
                message: "max_attempts must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Poll interval with the 500ms floor applied.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(500))
    }

    /// Retry delay with the 5s floor applied.
    pub fn retry_delay(&self) -> i64 {
        self.retry_delay_seconds.max(5)
    }

    /// Resolves the model API key from config or environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.ai_api_key
            .clone()
            .or_else(|| std::env::var("FISCUS_AI_API_KEY").ok())
    }
}
