//! Face Analysis
//!
//! Turns raw frames into at most one scored face per frame:
//! - `FaceDetector` contract for pluggable detectors
//! - `FaceAnalyzer` contract consumed by the verification pipeline
//! - `TrackingAnalyzer` adding temporal continuity and quality scoring

pub mod config;
pub mod detector;
pub mod tracker;

pub use config::AnalyzerConfig;
pub use detector::{DetectError, FaceBbox, FaceDetector};
pub use tracker::TrackingAnalyzer;

use camera_capture::VideoFrame;
use serde::{Deserialize, Serialize};

/// A detected face together with its quality score (higher = better)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub face: FaceBbox,
    pub quality: f32,
}

/// Stateful per-frame face analysis.
///
/// Implementations may keep temporal state between calls (tracking,
/// smoothing), hence `&mut self`. `reset` drops that state so a new subject
/// does not inherit the previous one's history.
pub trait FaceAnalyzer: Send {
    /// Find the single best face in `frame`, or nothing usable
    fn analyze(&mut self, frame: &VideoFrame) -> Option<FaceObservation>;

    /// Clear any temporal state
    fn reset(&mut self);
}
