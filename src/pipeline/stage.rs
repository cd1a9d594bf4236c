//! Processing stages for a receipt.
//!
//! Strictly ordered, no back-edges except through a full restart via job
//! retry. Each transition is persisted before the next stage begins so a
//! resumed run (or an observer) can see how far processing progressed.

use std::fmt;

/// Named checkpoint in the receipt processing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    VerifyingUpload,
    ExtractingText,
    ParsingAi,
    UpdatingRecords,
    Completed,
    Failed,
}

/// Outcome of one stage, used to compute the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    Failure,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VerifyingUpload => "verifying_upload",
            Self::ExtractingText => "extracting_text",
            Self::ParsingAi => "parsing_ai",
            Self::UpdatingRecords => "updating_records",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "verifying_upload" => Some(Self::VerifyingUpload),
            "extracting_text" => Some(Self::ExtractingText),
            "parsing_ai" => Some(Self::ParsingAi),
            "updating_records" => Some(Self::UpdatingRecords),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Computes the next stage given an outcome. Failure forces `Failed`;
    /// success advances one position; the terminals absorb.
    pub fn next(&self, outcome: StageOutcome) -> Self {
        if matches!(self, Self::Completed | Self::Failed) {
            return *self;
        }
        if outcome == StageOutcome::Failure {
            return Self::Failed;
        }
        match self {
            Self::VerifyingUpload => Self::ExtractingText,
            Self::ExtractingText => Self::ParsingAi,
            Self::ParsingAi => Self::UpdatingRecords,
            Self::UpdatingRecords => Self::Completed,
            Self::Completed | Self::Failed => unreachable!(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
