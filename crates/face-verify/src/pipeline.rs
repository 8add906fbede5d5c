//! Collaborator contracts for the embed-and-verify job

use camera_capture::VideoFrame;
use face_analysis::FaceBbox;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::warn;

use crate::{FaceEmbedding, Identity, PipelineError, ProcessError, VerifyError};

/// Turns a committed frame into an embedding.
///
/// CPU-heavy and synchronous; the orchestrator runs it on the blocking pool.
pub trait FaceProcessor: Send + Sync {
    fn process(&self, frame: &VideoFrame, face: &FaceBbox) -> Result<FaceEmbedding, ProcessError>;
}

/// Successful verification answer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchReceipt {
    /// Similarity reported by the verifier
    pub confidence: f32,
}

/// Asks the remote service whether an embedding belongs to an identity
pub trait Verifier: Send + Sync {
    fn verify(
        &self,
        identity: &Identity,
        embedding: &FaceEmbedding,
    ) -> impl Future<Output = Result<MatchReceipt, VerifyError>> + Send;
}

/// Fire-and-forget sink for recoverable pipeline failures
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &PipelineError);
}

/// Reports failures to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report(&self, error: &PipelineError) {
        match error {
            PipelineError::Verification(e) if e.is_transport() => {
                warn!(transport = true, "Verification attempt failed: {}", error)
            }
            _ => warn!("Verification attempt failed: {}", error),
        }
    }
}
