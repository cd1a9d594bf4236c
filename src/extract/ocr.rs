//! Text extraction via an external OCR process.
//!
//! The OCR engine runs out of process over a byte-stream interface:
//! document bytes go to stdin, a JSON object `{"text": "..."}` comes back
//! on stdout. Non-zero exit or unparsable stdout is a hard error and the
//! job retries per the normal policy.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::ProcessError;

/// Narrow contract over the OCR engine.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extracts plain text from raw document bytes.
    async fn extract_text(&self, bytes: &[u8]) -> Result<String, ProcessError>;
}

#[derive(Deserialize)]
struct OcrOutput {
    text: String,
}

/// Runs a configured OCR command as a subprocess.
pub struct OcrCommand {
    program: String,
    args: Vec<String>,
}

impl OcrCommand {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

#[async_trait]
impl TextExtractor for OcrCommand {
    async fn extract_text(&self, bytes: &[u8]) -> Result<String, ProcessError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| ProcessError::OcrSpawn {
                program: self.program.clone(),
                source: e,
            })?;

        // stdin is dropped after the write so the child sees EOF.
        {
            let mut stdin = child.stdin.take().ok_or_else(|| {
                ProcessError::OcrStdin(std::io::Error::other("stdin not captured"))
            })?;
            stdin.write_all(bytes).await.map_err(ProcessError::OcrStdin)?;
            stdin.shutdown().await.map_err(ProcessError::OcrStdin)?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ProcessError::OcrSpawn {
                program: self.program.clone(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProcessError::OcrFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.chars().take(1000).collect(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: OcrOutput = serde_json::from_str(stdout.trim())
            .map_err(|e| ProcessError::OcrOutput(e.to_string()))?;
        Ok(parsed.text)
    }
}
