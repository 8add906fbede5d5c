//! Verification error types

use camera_capture::CameraError;
use thiserror::Error;

/// Failures while turning a committed frame into an embedding
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Cropping, resizing or tensor preparation failed
    #[error("Face preprocessing failed: {0}")]
    Preprocessing(String),

    /// The embedding model failed or produced an unusable vector
    #[error("Embedding inference failed: {0}")]
    Inference(String),

    /// The processing task died before returning
    #[error("Processing task aborted: {0}")]
    Aborted(String),
}

/// Failures reported by the remote verifier
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Identity {0} not found")]
    NotFound(String),

    #[error("Face does not match the claimed identity")]
    Mismatch,

    #[error("Match confidence {confidence:.2} below threshold {threshold:.2}")]
    LowConfidence { confidence: f32, threshold: f32 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Verification timed out after {0}ms")]
    Timeout(u64),
}

impl VerifyError {
    /// Whether the failure came from the network path rather than the
    /// verification decision itself
    pub fn is_transport(&self) -> bool {
        matches!(self, VerifyError::Transport(_) | VerifyError::Timeout(_))
    }
}

/// Any recoverable failure of one embed-and-verify attempt
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Processing(#[from] ProcessError),

    #[error(transparent)]
    Verification(#[from] VerifyError),
}

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Collection window must be longer than zero")]
    ZeroWindow,

    #[error("Excellent quality threshold must be finite, got {0}")]
    InvalidThreshold(f32),

    #[error("Verification timeout must be longer than zero")]
    ZeroTimeout,
}

/// Orchestrator lifecycle errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Capture failed: {0}")]
    Capture(#[from] CameraError),

    #[error("No tokio runtime available to run verification jobs")]
    NoRuntime,
}
