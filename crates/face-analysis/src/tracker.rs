//! Temporal tracking analyzer

use camera_capture::VideoFrame;
use tracing::{debug, warn};

use crate::{AnalyzerConfig, FaceAnalyzer, FaceBbox, FaceDetector, FaceObservation};

/// Wraps a detector with single-subject tracking and quality scoring.
///
/// Quality is `confidence * size * continuity`:
/// - size saturates at 1.0 once the face reaches the target width ratio
/// - continuity is 1.0 for the first face after a reset and otherwise
///   interpolates from the floor to 1.0 with the IoU against the last track
pub struct TrackingAnalyzer<D> {
    detector: D,
    config: AnalyzerConfig,
    last_track: Option<FaceBbox>,
}

impl<D: FaceDetector> TrackingAnalyzer<D> {
    pub fn new(detector: D, config: AnalyzerConfig) -> Self {
        Self {
            detector,
            config,
            last_track: None,
        }
    }

    /// Box currently being tracked
    pub fn last_track(&self) -> Option<&FaceBbox> {
        self.last_track.as_ref()
    }

    fn score(&self, face: &FaceBbox, frame_width: u32) -> f32 {
        let width_ratio = face.width / frame_width.max(1) as f32;
        let size = (width_ratio / self.config.target_face_width_ratio).clamp(0.0, 1.0);
        let continuity = match &self.last_track {
            Some(previous) => {
                let floor = self.config.continuity_floor;
                floor + (1.0 - floor) * previous.iou(face)
            }
            None => 1.0,
        };
        face.confidence.clamp(0.0, 1.0) * size * continuity
    }
}

impl<D: FaceDetector> FaceAnalyzer for TrackingAnalyzer<D> {
    fn analyze(&mut self, frame: &VideoFrame) -> Option<FaceObservation> {
        let faces = match self.detector.detect(frame) {
            Ok(faces) => faces,
            Err(e) => {
                warn!("Face detection failed on frame {}: {}", frame.sequence, e);
                self.last_track = None;
                return None;
            }
        };

        let min_width = self.config.min_face_width_ratio * frame.width as f32;
        let best = faces
            .into_iter()
            .filter(|f| f.confidence >= self.config.min_confidence && f.width >= min_width)
            .max_by(|a, b| a.area().total_cmp(&b.area()));

        let Some(face) = best else {
            self.last_track = None;
            return None;
        };

        let quality = self.score(&face, frame.width);
        debug!(
            "Frame {}: face {:.0}x{:.0} conf={:.2} quality={:.3}",
            frame.sequence, face.width, face.height, face.confidence, quality
        );
        self.last_track = Some(face);

        Some(FaceObservation { face, quality })
    }

    fn reset(&mut self) {
        self.last_track = None;
    }
}
