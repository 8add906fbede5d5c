//! Analyzer configuration

use serde::{Deserialize, Serialize};

/// Tracking analyzer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Detections below this confidence are ignored
    pub min_confidence: f32,

    /// Faces narrower than this fraction of the frame width are ignored
    pub min_face_width_ratio: f32,

    /// Face width (fraction of frame width) at which the size factor saturates
    pub target_face_width_ratio: f32,

    /// Continuity factor applied to a face with no overlap with the last track
    pub continuity_floor: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            min_face_width_ratio: 0.1,
            target_face_width_ratio: 0.25,
            continuity_floor: 0.5,
        }
    }
}

impl AnalyzerConfig {
    /// Create strict config (bigger, more confident faces only)
    pub fn strict() -> Self {
        Self {
            min_confidence: 0.7,
            min_face_width_ratio: 0.2,
            target_face_width_ratio: 0.35,
            ..Default::default()
        }
    }
}
