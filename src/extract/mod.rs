//! External extraction adapters: OCR subprocess and generative model.

pub mod client;
pub mod fields;
pub mod json_recovery;
pub mod ocr;

pub use client::{GeminiClient, GenerativeClient, Message, ModelError};
pub use fields::FieldExtractor;
pub use json_recovery::recover_json;
pub use ocr::{OcrCommand, TextExtractor};
