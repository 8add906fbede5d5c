//! Demo collaborators
//!
//! Self-contained stand-ins for the detector, embedding model and remote
//! verification service so the pipeline can run end to end without models
//! or network access.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use camera_capture::{CameraConfig, FrameGenerator, VideoFrame};
use face_analysis::{DetectError, FaceBbox, FaceDetector};
use face_verify::{FaceEmbedding, FaceProcessor, Identity, MatchReceipt, ProcessError, Verifier, VerifyError};
use image::imageops::{self, FilterType};
use tracing::debug;
use uuid::Uuid;

const BACKGROUND: [u8; 3] = [20, 24, 28];
const SKIN: [u8; 3] = [235, 215, 200];
const FEATURE: [u8; 3] = [60, 40, 40];

/// Finds the bounding box of all pixels brighter than a luma threshold
#[derive(Debug, Clone)]
pub struct BrightBlobDetector {
    luma_threshold: u8,
    min_pixels: usize,
}

impl BrightBlobDetector {
    pub fn new(luma_threshold: u8) -> Self {
        Self {
            luma_threshold,
            min_pixels: 16,
        }
    }
}

impl FaceDetector for BrightBlobDetector {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<FaceBbox>, DetectError> {
        if !frame.is_well_formed() {
            return Err(DetectError::ImageProcessing(format!(
                "frame {} has {} bytes for {}x{}",
                frame.sequence,
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }

        let width = frame.width as usize;
        let mut count = 0usize;
        let (mut x0, mut y0, mut x1, mut y1) = (usize::MAX, usize::MAX, 0usize, 0usize);
        for (i, luma) in frame.to_grayscale().into_iter().enumerate() {
            if luma > self.luma_threshold {
                let (x, y) = (i % width, i / width);
                x0 = x0.min(x);
                y0 = y0.min(y);
                x1 = x1.max(x);
                y1 = y1.max(y);
                count += 1;
            }
        }

        if count < self.min_pixels {
            return Ok(Vec::new());
        }

        let (w, h) = (x1 - x0 + 1, y1 - y0 + 1);
        // A solid blob fills its box; scattered highlights do not
        let fill = count as f32 / (w * h) as f32;
        Ok(vec![FaceBbox {
            x: x0 as f32,
            y: y0 as f32,
            width: w as f32,
            height: h as f32,
            confidence: (fill * 1.25).min(1.0),
        }])
    }
}

/// Embeds a face as its downsampled grayscale thumbnail
#[derive(Debug, Clone)]
pub struct ThumbnailEmbedder {
    size: u32,
}

impl ThumbnailEmbedder {
    pub fn new(size: u32) -> Self {
        Self { size: size.max(1) }
    }
}

impl Default for ThumbnailEmbedder {
    fn default() -> Self {
        Self::new(16)
    }
}

impl FaceProcessor for ThumbnailEmbedder {
    fn process(&self, frame: &VideoFrame, face: &FaceBbox) -> Result<FaceEmbedding, ProcessError> {
        let (x, y, w, h) = face
            .pixel_rect(frame.width, frame.height)
            .ok_or_else(|| ProcessError::Preprocessing("face box outside frame".into()))?;
        let crop = frame
            .crop(x, y, w, h)
            .ok_or_else(|| ProcessError::Preprocessing(format!("cannot crop {}x{} at ({}, {})", w, h, x, y)))?;
        let gray = crop
            .to_luma_image()
            .ok_or_else(|| ProcessError::Preprocessing("malformed face crop".into()))?;

        let thumbnail = imageops::resize(&gray, self.size, self.size, FilterType::Triangle);
        let vector = thumbnail.pixels().map(|p| p.0[0] as f32 / 255.0).collect();
        FaceEmbedding::normalized(vector)
            .ok_or_else(|| ProcessError::Inference("degenerate embedding".into()))
    }
}

/// In-memory verification service with simulated latency
pub struct GalleryVerifier {
    gallery: RwLock<HashMap<Uuid, Vec<FaceEmbedding>>>,
    threshold: f32,
    latency: Duration,
}

impl GalleryVerifier {
    pub fn new(threshold: f32, latency: Duration) -> Self {
        Self {
            gallery: RwLock::new(HashMap::new()),
            threshold,
            latency,
        }
    }

    /// Add a reference embedding for an identity
    pub fn enroll(&self, id: Uuid, embedding: FaceEmbedding) {
        let mut gallery = self.gallery.write().unwrap_or_else(|e| e.into_inner());
        gallery.entry(id).or_default().push(embedding);
    }

    /// Best similarity against the identity's enrolled embeddings
    fn best_similarity(&self, id: &Uuid, embedding: &FaceEmbedding) -> Result<f32, VerifyError> {
        let gallery = self.gallery.read().unwrap_or_else(|e| e.into_inner());
        let enrolled = gallery
            .get(id)
            .filter(|enrolled| !enrolled.is_empty())
            .ok_or_else(|| VerifyError::NotFound(id.to_string()))?;

        enrolled
            .iter()
            .filter(|reference| reference.dimension() == embedding.dimension())
            .map(|reference| cosine_similarity(&reference.vector, &embedding.vector))
            .reduce(f32::max)
            .ok_or(VerifyError::Mismatch)
    }
}

impl Verifier for GalleryVerifier {
    async fn verify(
        &self,
        identity: &Identity,
        embedding: &FaceEmbedding,
    ) -> Result<MatchReceipt, VerifyError> {
        tokio::time::sleep(self.latency).await;

        let confidence = self.best_similarity(&identity.id, embedding)?;
        debug!("Gallery similarity for {}: {:.3}", identity.display_name, confidence);
        if confidence >= self.threshold {
            Ok(MatchReceipt { confidence })
        } else {
            Err(VerifyError::LowConfidence {
                confidence,
                threshold: self.threshold,
            })
        }
    }
}

/// Compute cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// Frame with a stylised face of side `size` at `(x, y)` on a dark
/// background
pub fn face_frame(width: u32, height: u32, x: u32, y: u32, size: u32) -> VideoFrame {
    let mut frame = VideoFrame::filled(width, height, BACKGROUND);
    for row in y..(y + size).min(height) {
        for col in x..(x + size).min(width) {
            frame.set_pixel(col, row, SKIN);
        }
    }

    // Eyes and mouth, in face-relative coordinates
    let unit = (size / 8).max(1);
    let features = [
        (2 * unit, 2 * unit, unit, unit),
        (5 * unit, 2 * unit, unit, unit),
        (2 * unit, 5 * unit, 4 * unit, unit),
    ];
    for (fx, fy, fw, fh) in features {
        for row in (y + fy)..(y + fy + fh).min(height) {
            for col in (x + fx)..(x + fx + fw).min(width) {
                frame.set_pixel(col, row, FEATURE);
            }
        }
    }
    frame
}

/// Reference enrollment image: the face centred at a comfortable size
pub fn enrollment_frame(camera: &CameraConfig) -> (VideoFrame, FaceBbox) {
    let size = camera.width.min(camera.height) / 2;
    let x = (camera.width - size) / 2;
    let y = (camera.height - size) / 2;
    let face = FaceBbox {
        x: x as f32,
        y: y as f32,
        width: size as f32,
        height: size as f32,
        confidence: 1.0,
    };
    (face_frame(camera.width, camera.height, x, y, size), face)
}

/// Scripted scene: a face walks in from far away, grows toward the camera,
/// then leaves the frame and the cycle repeats
pub fn approaching_face(camera: &CameraConfig) -> FrameGenerator {
    const CYCLE: u32 = 90;
    const ABSENT: u32 = 10;

    let (width, height) = (camera.width, camera.height);
    let max_size = width.min(height) / 2;
    Box::new(move |sequence: u32| {
        let phase = sequence % CYCLE;
        if phase < ABSENT {
            return Some(VideoFrame::filled(width, height, BACKGROUND));
        }
        let progress = (phase - ABSENT) as f32 / (CYCLE - ABSENT) as f32;
        let size = ((max_size as f32) * (0.3 + 0.7 * progress)) as u32;
        let x = (width - size) / 2;
        let y = (height - size) / 2;
        Some(face_frame(width, height, x, y, size))
    })
}
