//! Live Face Verification Pipeline
//!
//! Turns a continuous stream of camera frames into at most one in-flight
//! identity verification:
//! - Best-frame collection over a short, quality-aware window
//! - A lock-free gate that drops frames while a verification runs
//! - An orchestrator driving `detecting -> processing -> matched`
//! - Cooperative cancellation when the screen goes away

pub mod collector;
pub mod config;
pub mod error;
pub mod gate;
pub mod identity;
pub mod orchestrator;
pub mod pipeline;
pub mod state;

pub use collector::{BestFrameCollector, CollectorOutcome, FaceCandidate, Winner};
pub use config::{CollectorConfig, VerificationConfig};
pub use error::{ConfigError, OrchestratorError, PipelineError, ProcessError, VerifyError};
pub use gate::FrameGate;
pub use identity::{FaceEmbedding, Identity};
pub use orchestrator::{describe_metrics, Collaborators, VerificationOrchestrator};
pub use pipeline::{ErrorReporter, FaceProcessor, LogErrorReporter, MatchReceipt, Verifier};
pub use state::{PipelineStats, VerificationSnapshot, VerificationState};
