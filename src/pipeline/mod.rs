//! Receipt processing pipeline: orchestrator, stages, and record linkage.

pub mod error;
pub mod linkage;
pub mod runner;
pub mod stage;

pub use error::PipelineError;
pub use linkage::link_record;
pub use runner::Pipeline;
pub use stage::{ProcessingStage, StageOutcome};
