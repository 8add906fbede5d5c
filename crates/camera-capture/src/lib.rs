//! Camera Capture Library for Face Verification
//!
//! Provides the push-based capture contract consumed by the verification
//! pipeline:
//! - `VideoFrame` decoded RGB frames
//! - `CaptureSource` trait (start with a frame sink, stop, query streaming)
//! - `SyntheticCamera` producer thread for demos and tests

pub mod frame;
pub mod synthetic;

pub use frame::VideoFrame;
pub use synthetic::{FrameGenerator, SyntheticCamera};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Camera is already streaming")]
    AlreadyStreaming,
}

/// Camera configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or "synthetic"
    pub device: String,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Target FPS
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "synthetic".to_string(),
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

impl CameraConfig {
    /// Front-facing camera at a low resolution, the usual verification setup
    pub fn front() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// Callback receiving every frame the capture source produces.
///
/// Invoked on the producer's own thread, at the producer's pace.
pub type FrameSink = Arc<dyn Fn(VideoFrame) + Send + Sync>;

/// A push-based frame source.
///
/// The owner starts it with a sink and stops it when done; the source never
/// waits for the sink to catch up, so slow consumers must drop frames
/// themselves.
pub trait CaptureSource: Send {
    /// Begin delivering frames to `sink`.
    fn start(&mut self, sink: FrameSink) -> Result<(), CameraError>;

    /// Stop delivering frames and release the device. Safe to call when idle.
    fn stop(&mut self);

    /// Whether frames are currently being delivered.
    fn is_streaming(&self) -> bool;
}
