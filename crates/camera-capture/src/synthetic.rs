//! Synthetic camera that pushes generated frames from a producer thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::{CameraConfig, CameraError, CaptureSource, FrameSink, VideoFrame};

/// Produces the frame for a given sequence number; `None` ends the stream.
pub type FrameGenerator = Box<dyn FnMut(u32) -> Option<VideoFrame> + Send>;

/// Frame source driven by a generator closure.
///
/// Frames are stamped with their sequence number and the time since `start`
/// and pushed at the configured rate, independent of how fast the sink
/// consumes them.
pub struct SyntheticCamera {
    config: CameraConfig,
    generator: Arc<Mutex<FrameGenerator>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticCamera {
    /// Create a camera around a frame generator
    pub fn new(config: CameraConfig, generator: FrameGenerator) -> Self {
        Self {
            config,
            generator: Arc::new(Mutex::new(generator)),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Camera configuration
    pub fn config(&self) -> &CameraConfig {
        &self.config
    }
}

impl CaptureSource for SyntheticCamera {
    fn start(&mut self, sink: FrameSink) -> Result<(), CameraError> {
        if self.is_streaming() {
            return Err(CameraError::AlreadyStreaming);
        }
        if self.config.fps == 0 {
            return Err(CameraError::Format("fps must be greater than zero".into()));
        }
        // Reap a worker that ran out of frames on its own
        self.stop();

        let interval = Duration::from_micros(1_000_000 / self.config.fps as u64);
        let shutdown = Arc::new(AtomicBool::new(false));
        self.shutdown = shutdown.clone();
        let generator = self.generator.clone();

        info!(
            "Starting synthetic camera {} ({}x{} @ {}fps)",
            self.config.device, self.config.width, self.config.height, self.config.fps
        );

        let worker = std::thread::Builder::new()
            .name("synthetic-camera".into())
            .spawn(move || {
                let started = Instant::now();
                let mut sequence: u32 = 0;

                while !shutdown.load(Ordering::SeqCst) {
                    let next = {
                        let mut generate = generator.lock().unwrap_or_else(|e| e.into_inner());
                        generate(sequence)
                    };
                    let Some(mut frame) = next else {
                        debug!("Frame generator exhausted after {} frames", sequence);
                        break;
                    };

                    frame.sequence = sequence;
                    frame.timestamp_ns = started.elapsed().as_nanos() as u64;
                    sink(frame);

                    sequence = sequence.wrapping_add(1);
                    std::thread::sleep(interval);
                }
            })
            .map_err(|e| CameraError::Open(e.to_string()))?;

        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Synthetic camera thread panicked");
            }
            debug!("Synthetic camera stopped");
        }
    }

    fn is_streaming(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop();
    }
}
