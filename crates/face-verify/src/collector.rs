//! Best-frame collector
//!
//! Watches a stream of scored candidates and decides when to commit one of
//! them to the expensive embed-and-verify path. A window opens on the first
//! candidate after a reset and closes either when it has run for the window
//! duration or when a candidate reaches the excellent-quality threshold.

use camera_capture::VideoFrame;
use face_analysis::FaceBbox;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::CollectorConfig;

/// A scored face together with the frame it was found in
#[derive(Debug, Clone)]
pub struct FaceCandidate {
    pub face: FaceBbox,
    pub frame: VideoFrame,
    pub quality: f32,
}

/// The candidate chosen to proceed to embedding and verification
#[derive(Debug, Clone)]
pub struct Winner {
    pub face: FaceBbox,
    pub frame: VideoFrame,
    pub quality: f32,
}

impl From<FaceCandidate> for Winner {
    fn from(candidate: FaceCandidate) -> Self {
        Self {
            face: candidate.face,
            frame: candidate.frame,
            quality: candidate.quality,
        }
    }
}

/// Result of feeding one candidate to the collector
#[derive(Debug)]
pub struct CollectorOutcome {
    pub winner: Option<Winner>,
    /// Window progress in [0, 1], for UI feedback only
    pub progress: f32,
}

/// One attempt at gathering a good frame.
///
/// The start time and the best candidate are created together, so a window
/// can never exist without a candidate.
struct CollectionWindow {
    started_at: Instant,
    best: FaceCandidate,
}

/// Time-boxed best-frame selection.
///
/// All state sits behind one mutex; `process` and `reset` are mutually
/// exclusive and callable from any thread.
pub struct BestFrameCollector {
    config: CollectorConfig,
    window: Mutex<Option<CollectionWindow>>,
}

impl BestFrameCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            window: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Feed a candidate observed now
    pub fn process(&self, candidate: FaceCandidate) -> CollectorOutcome {
        self.process_at(candidate, Instant::now())
    }

    /// Feed a candidate observed at `now`.
    ///
    /// The stored best is replaced only by a strictly higher quality, so on
    /// ties the earlier candidate wins.
    pub fn process_at(&self, candidate: FaceCandidate, now: Instant) -> CollectorOutcome {
        let quality = candidate.quality;
        let mut slot = self.lock();
        let window_len = self.config.window_duration();

        if !quality.is_finite() {
            debug!("Ignoring frame {} with quality {}", candidate.frame.sequence, quality);
            let progress = slot.as_ref().map_or(0.0, |window| {
                window_progress(now.saturating_duration_since(window.started_at), window_len)
            });
            return CollectorOutcome {
                winner: None,
                progress,
            };
        }

        let started_at = match slot.as_mut() {
            Some(window) => {
                if quality > window.best.quality {
                    window.best = candidate;
                }
                window.started_at
            }
            None => {
                *slot = Some(CollectionWindow {
                    started_at: now,
                    best: candidate,
                });
                now
            }
        };

        let elapsed = now.saturating_duration_since(started_at);

        if elapsed >= window_len || quality >= self.config.excellent_quality {
            let winner = slot.take().map(|window| Winner::from(window.best));
            if let Some(winner) = &winner {
                debug!(
                    "Committing frame {} (quality {:.3}) after {:?}",
                    winner.frame.sequence, winner.quality, elapsed
                );
            }
            return CollectorOutcome {
                winner,
                progress: 1.0,
            };
        }

        CollectorOutcome {
            winner: None,
            progress: window_progress(elapsed, window_len),
        }
    }

    /// Discard the current window, if any
    pub fn reset(&self) {
        *self.lock() = None;
    }

    /// Discard the current window; returns whether one was open
    pub fn reset_if_collecting(&self) -> bool {
        self.lock().take().is_some()
    }

    /// Whether a window is currently open
    pub fn is_collecting(&self) -> bool {
        self.lock().is_some()
    }

    /// Quality of the best candidate in the open window
    pub fn best_quality(&self) -> Option<f32> {
        self.lock().as_ref().map(|window| window.best.quality)
    }

    fn lock(&self) -> MutexGuard<'_, Option<CollectionWindow>> {
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn window_progress(elapsed: Duration, window: Duration) -> f32 {
    if window.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f32() / window.as_secs_f32()).min(1.0)
}
