//! UI-facing verification state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Verification lifecycle as seen by a presentation layer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VerificationState {
    /// Scanning for a face, no frame committed yet
    #[default]
    Detecting,
    /// A frame was committed and is being embedded and verified
    Processing,
    /// Verification succeeded; terminal until restarted
    Matched {
        identity_id: Uuid,
        display_name: String,
        confidence: f32,
        matched_at: DateTime<Utc>,
    },
}

impl VerificationState {
    /// Stable lowercase name, matching the serialized tag
    pub fn name(&self) -> &'static str {
        match self {
            VerificationState::Detecting => "detecting",
            VerificationState::Processing => "processing",
            VerificationState::Matched { .. } => "matched",
        }
    }

    pub fn is_detecting(&self) -> bool {
        matches!(self, VerificationState::Detecting)
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, VerificationState::Processing)
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, VerificationState::Matched { .. })
    }
}

/// Published state plus collection progress
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VerificationSnapshot {
    #[serde(flatten)]
    pub state: VerificationState,
    /// Collection window progress in [0, 1]
    pub progress: f32,
}

impl VerificationSnapshot {
    pub fn detecting() -> Self {
        Self::default()
    }

    pub fn processing() -> Self {
        Self {
            state: VerificationState::Processing,
            progress: 1.0,
        }
    }
}

/// Pipeline counters since construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Frames delivered by the capture source
    pub frames_received: u64,
    /// Frames dropped without analysis (gate claimed or not accepting)
    pub frames_dropped: u64,
    /// Frames handed to the analyzer
    pub frames_analyzed: u64,
    /// Windows that produced a winner
    pub windows_committed: u64,
    /// Embed-and-verify jobs launched
    pub attempts: u64,
    /// Jobs that ended in a match
    pub matches: u64,
    /// Jobs that ended in a reported failure
    pub failures: u64,
}
