//! Verification orchestrator
//!
//! State machine tying capture, analysis, best-frame collection and the
//! embed-and-verify job together:
//!
//! ```text
//! detecting --winner--> processing --ok--> matched
//!     ^                     |
//!     +---error / stop------+
//! ```
//!
//! Frames arrive on the capture thread. The gate is checked before the
//! analyzer runs, so while a job is in flight every frame costs two atomic
//! loads. Published state, the gate and the job handle only change under the
//! control lock; each job carries an epoch so that a job superseded by
//! `stop()` can neither publish state nor release the gate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use camera_capture::{CaptureSource, FrameSink, VideoFrame};
use chrono::Utc;
use face_analysis::FaceAnalyzer;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::collector::{BestFrameCollector, FaceCandidate, Winner};
use crate::gate::FrameGate;
use crate::pipeline::{ErrorReporter, FaceProcessor, MatchReceipt, Verifier};
use crate::state::{PipelineStats, VerificationSnapshot, VerificationState};
use crate::{Identity, OrchestratorError, PipelineError, ProcessError, VerificationConfig, VerifyError};

const FRAMES_RECEIVED: &str = "face_verify_frames_received_total";
const FRAMES_DROPPED: &str = "face_verify_frames_dropped_total";
const FRAMES_ANALYZED: &str = "face_verify_frames_analyzed_total";
const WINDOWS_COMMITTED: &str = "face_verify_windows_committed_total";
const ATTEMPTS: &str = "face_verify_attempts_total";
const ATTEMPT_SECONDS: &str = "face_verify_attempt_duration_seconds";

/// Register descriptions for the pipeline metrics with the installed recorder
pub fn describe_metrics() {
    describe_counter!(FRAMES_RECEIVED, "Frames delivered by the capture source");
    describe_counter!(FRAMES_DROPPED, "Frames dropped without analysis");
    describe_counter!(FRAMES_ANALYZED, "Frames handed to the face analyzer");
    describe_counter!(WINDOWS_COMMITTED, "Collection windows that produced a winner");
    describe_counter!(ATTEMPTS, "Verification attempts by outcome");
    describe_histogram!(
        ATTEMPT_SECONDS,
        Unit::Seconds,
        "Duration of one embed-and-verify attempt"
    );
}

/// External collaborators driven by the orchestrator
pub struct Collaborators<P, V> {
    pub analyzer: Box<dyn FaceAnalyzer>,
    pub processor: P,
    pub verifier: V,
    pub reporter: Arc<dyn ErrorReporter>,
}

/// Drives one verification screen.
///
/// Owns the capture source, the collector and the gate; none of them are
/// reachable from outside. Dropping the orchestrator stops capture and
/// aborts any in-flight job.
pub struct VerificationOrchestrator<P, V> {
    shared: Arc<Shared<P, V>>,
    capture: Mutex<Option<Box<dyn CaptureSource>>>,
}

struct Shared<P, V> {
    config: VerificationConfig,
    target: Identity,
    /// Cleared before `start`, after `stop` and once matched
    accepting: AtomicBool,
    gate: FrameGate,
    collector: BestFrameCollector,
    analyzer: Mutex<Box<dyn FaceAnalyzer>>,
    processor: Arc<P>,
    verifier: V,
    reporter: Arc<dyn ErrorReporter>,
    control: Mutex<Control>,
    snapshot: watch::Sender<VerificationSnapshot>,
    counters: Counters,
    runtime: Handle,
}

#[derive(Default)]
struct Control {
    epoch: u64,
    job: Option<InFlightJob>,
}

/// Registered when the gate is claimed; the task handle is attached once
/// spawned
struct InFlightJob {
    epoch: u64,
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    dropped: AtomicU64,
    analyzed: AtomicU64,
    committed: AtomicU64,
    attempts: AtomicU64,
    matches: AtomicU64,
    failures: AtomicU64,
}

enum JobOutcome {
    Matched(MatchReceipt),
    Failed(PipelineError),
    Cancelled,
}

/// Releases the job's claim however the job future ends, including when the
/// runtime drops it without ever polling it
struct JobGuard<P, V> {
    shared: Arc<Shared<P, V>>,
    epoch: u64,
}

impl<P, V> Drop for JobGuard<P, V> {
    fn drop(&mut self) {
        self.shared.release_job(self.epoch);
    }
}

impl<P, V> VerificationOrchestrator<P, V>
where
    P: FaceProcessor + 'static,
    V: Verifier + 'static,
{
    /// Create an idle orchestrator. Must be called from within a tokio
    /// runtime; jobs are spawned onto that runtime.
    pub fn new(
        config: VerificationConfig,
        target: Identity,
        collaborators: Collaborators<P, V>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| OrchestratorError::NoRuntime)?;
        let (snapshot, _) = watch::channel(VerificationSnapshot::detecting());

        info!(
            "Creating verification orchestrator for {} (window {}ms, excellent >= {})",
            target.display_name, config.collector.window_ms, config.collector.excellent_quality
        );

        Ok(Self {
            shared: Arc::new(Shared {
                collector: BestFrameCollector::new(config.collector.clone()),
                config,
                target,
                accepting: AtomicBool::new(false),
                gate: FrameGate::new(),
                analyzer: Mutex::new(collaborators.analyzer),
                processor: Arc::new(collaborators.processor),
                verifier: collaborators.verifier,
                reporter: collaborators.reporter,
                control: Mutex::new(Control::default()),
                snapshot,
                counters: Counters::default(),
                runtime,
            }),
            capture: Mutex::new(None),
        })
    }

    /// Attach the capture source started and stopped with the orchestrator
    pub fn with_capture(self, capture: Box<dyn CaptureSource>) -> Self {
        *lock(&self.capture) = Some(capture);
        self
    }

    /// Reset to `detecting`, start accepting frames and start capture.
    ///
    /// A no-op while already running. After `matched` this begins a fresh
    /// verification.
    pub fn start(&self) -> Result<(), OrchestratorError> {
        if !self.shared.arm() {
            debug!("Verification already running");
            return Ok(());
        }

        let mut capture = lock(&self.capture);
        if let Some(source) = capture.as_mut() {
            if !source.is_streaming() {
                if let Err(e) = source.start(self.frame_sink()) {
                    self.shared.accepting.store(false, Ordering::SeqCst);
                    warn!("Failed to start capture: {}", e);
                    return Err(e.into());
                }
            }
        }

        info!("Verification started for {}", self.shared.target.display_name);
        Ok(())
    }

    /// Push one frame into the pipeline
    pub fn on_frame(&self, frame: VideoFrame) {
        self.shared.on_frame(frame);
    }

    /// Callback form of [`Self::on_frame`] for push-based capture sources
    pub fn frame_sink(&self) -> FrameSink {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |frame: VideoFrame| shared.on_frame(frame))
    }
}

impl<P, V> VerificationOrchestrator<P, V> {
    /// Cancel any in-flight job, release the gate, reset collection, publish
    /// `detecting` and stop capture. Safe to call repeatedly or when idle.
    pub fn stop(&self) {
        if self.shared.halt().is_some() {
            info!("Cancelled in-flight verification attempt");
        }
        if let Some(source) = lock(&self.capture).as_mut() {
            source.stop();
        }
        debug!("Verification stopped");
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<VerificationSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Current state and progress
    pub fn snapshot(&self) -> VerificationSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Whether an embed-and-verify job holds the gate
    pub fn is_verifying(&self) -> bool {
        self.shared.gate.read()
    }

    /// Whether the capture source is delivering frames
    pub fn is_capturing(&self) -> bool {
        lock(&self.capture)
            .as_ref()
            .is_some_and(|source| source.is_streaming())
    }

    pub fn target(&self) -> &Identity {
        &self.shared.target
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot()
    }
}

impl<P, V> Drop for VerificationOrchestrator<P, V> {
    fn drop(&mut self) {
        if let Some(handle) = self.shared.halt().and_then(|job| job.handle) {
            handle.abort();
        }
        let capture = self.capture.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(source) = capture.as_mut() {
            source.stop();
        }
    }
}

impl<P, V> Shared<P, V>
where
    P: FaceProcessor + 'static,
    V: Verifier + 'static,
{
    fn on_frame(self: &Arc<Self>, frame: VideoFrame) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        counter!(FRAMES_RECEIVED).increment(1);

        if !self.accepting.load(Ordering::Acquire) || self.gate.read() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            counter!(FRAMES_DROPPED).increment(1);
            return;
        }

        self.counters.analyzed.fetch_add(1, Ordering::Relaxed);
        counter!(FRAMES_ANALYZED).increment(1);

        let observation = {
            let mut analyzer = lock(&self.analyzer);
            let observation = analyzer.analyze(&frame);
            if observation.is_none() && self.collector.reset_if_collecting() {
                analyzer.reset();
                debug!("Face lost on frame {}, collection window discarded", frame.sequence);
                self.publish_progress(0.0);
            }
            observation
        };
        let Some(observation) = observation else {
            return;
        };

        let outcome = self.collector.process(FaceCandidate {
            face: observation.face,
            frame,
            quality: observation.quality,
        });

        match outcome.winner {
            Some(winner) => self.launch(winner),
            None => self.publish_progress(outcome.progress),
        }
    }

    fn launch(self: &Arc<Self>, winner: Winner) {
        self.counters.committed.fetch_add(1, Ordering::Relaxed);
        counter!(WINDOWS_COMMITTED).increment(1);

        let (epoch, cancelled) = {
            let mut control = lock(&self.control);
            if !self.accepting.load(Ordering::Acquire) || !self.gate.try_claim() {
                debug!(
                    "Dropping committed frame {}: pipeline busy or stopped",
                    winner.frame.sequence
                );
                return;
            }

            // Frames that slipped past the gate check may have opened a window
            self.collector.reset();

            control.epoch += 1;
            let epoch = control.epoch;
            let cancelled = Arc::new(AtomicBool::new(false));
            control.job = Some(InFlightJob {
                epoch,
                cancelled: Arc::clone(&cancelled),
                handle: None,
            });
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            self.snapshot.send_replace(VerificationSnapshot::processing());
            (epoch, cancelled)
        };

        info!(
            "Committed frame {} (quality {:.3}), starting verification attempt {}",
            winner.frame.sequence, winner.quality, epoch
        );

        // Spawned without the control lock: a runtime that has shut down
        // drops the future inside `spawn`, and the guard releases right there
        let guard = JobGuard {
            shared: Arc::clone(self),
            epoch,
        };
        let handle = self
            .runtime
            .spawn(Arc::clone(self).run_job(guard, cancelled, winner));

        let mut control = lock(&self.control);
        if let Some(job) = control.job.as_mut().filter(|job| job.epoch == epoch) {
            job.handle = Some(handle);
        }
    }

    async fn run_job(
        self: Arc<Self>,
        guard: JobGuard<P, V>,
        cancelled: Arc<AtomicBool>,
        winner: Winner,
    ) {
        let epoch = guard.epoch;
        let started = Instant::now();
        let outcome = self.embed_and_verify(&cancelled, winner).await;
        self.finish(epoch, outcome, started.elapsed());
        drop(guard);
    }

    async fn embed_and_verify(&self, cancelled: &AtomicBool, winner: Winner) -> JobOutcome {
        let processor = Arc::clone(&self.processor);
        let processed =
            tokio::task::spawn_blocking(move || processor.process(&winner.frame, &winner.face))
                .await;

        let embedding = match processed {
            Ok(Ok(embedding)) => embedding,
            Ok(Err(e)) => return JobOutcome::Failed(e.into()),
            Err(e) => return JobOutcome::Failed(ProcessError::Aborted(e.to_string()).into()),
        };

        // Last point at which stop() can prevent the network call
        if cancelled.load(Ordering::Acquire) {
            debug!("Verification cancelled before contacting the verifier");
            return JobOutcome::Cancelled;
        }

        let verification = self.verifier.verify(&self.target, &embedding);
        match tokio::time::timeout(self.config.verify_timeout(), verification).await {
            Ok(Ok(receipt)) => JobOutcome::Matched(receipt),
            Ok(Err(e)) => JobOutcome::Failed(e.into()),
            Err(_) => JobOutcome::Failed(VerifyError::Timeout(self.config.verify_timeout_ms).into()),
        }
    }

    fn finish(&self, epoch: u64, outcome: JobOutcome, elapsed: Duration) {
        histogram!(ATTEMPT_SECONDS).record(elapsed.as_secs_f64());

        let failure = {
            let mut control = lock(&self.control);
            if control.epoch != epoch {
                debug!("Discarding result of superseded verification attempt {}", epoch);
                counter!(ATTEMPTS, "outcome" => "cancelled").increment(1);
                return;
            }
            control.job = None;

            let failure = match outcome {
                JobOutcome::Matched(receipt) => {
                    self.accepting.store(false, Ordering::SeqCst);
                    self.counters.matches.fetch_add(1, Ordering::Relaxed);
                    counter!(ATTEMPTS, "outcome" => "matched").increment(1);
                    info!(
                        identity = %self.target.id,
                        "Verified {} (confidence {:.3}) in {:?}",
                        self.target.display_name, receipt.confidence, elapsed
                    );
                    self.snapshot.send_replace(VerificationSnapshot {
                        state: VerificationState::Matched {
                            identity_id: self.target.id,
                            display_name: self.target.display_name.clone(),
                            confidence: receipt.confidence,
                            matched_at: Utc::now(),
                        },
                        progress: 1.0,
                    });
                    None
                }
                JobOutcome::Failed(error) => {
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    counter!(ATTEMPTS, "outcome" => "failed").increment(1);
                    self.collector.reset();
                    self.snapshot.send_replace(VerificationSnapshot::detecting());
                    Some(error)
                }
                JobOutcome::Cancelled => {
                    counter!(ATTEMPTS, "outcome" => "cancelled").increment(1);
                    self.collector.reset();
                    self.snapshot.send_replace(VerificationSnapshot::detecting());
                    None
                }
            };
            self.gate.set(false);
            failure
        };

        if let Some(error) = failure {
            self.reporter.report(&error);
        }
    }
}

impl<P, V> Shared<P, V> {
    /// Prepare for a new attempt; returns `false` if already accepting
    fn arm(&self) -> bool {
        let _control = lock(&self.control);
        if self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        self.collector.reset();
        lock(&self.analyzer).reset();
        self.snapshot.send_replace(VerificationSnapshot::detecting());
        self.accepting.store(true, Ordering::SeqCst);
        true
    }

    /// Stop accepting frames and supersede any in-flight job
    fn halt(&self) -> Option<InFlightJob> {
        self.accepting.store(false, Ordering::SeqCst);

        let job = {
            let mut control = lock(&self.control);
            control.epoch += 1;
            let job = control.job.take();
            if let Some(job) = &job {
                job.cancelled.store(true, Ordering::Release);
            }
            self.gate.set(false);
            self.snapshot.send_replace(VerificationSnapshot::detecting());
            job
        };

        self.collector.reset();
        lock(&self.analyzer).reset();
        job
    }

    fn release_job(&self, epoch: u64) {
        let mut control = lock(&self.control);
        if control.job.as_ref().map(|job| job.epoch) != Some(epoch) {
            return;
        }
        control.job = None;

        // A job that unwound without finishing leaves `processing` behind
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.state.is_processing() {
                *snapshot = VerificationSnapshot::detecting();
                true
            } else {
                false
            }
        });
        self.gate.set(false);
    }

    fn publish_progress(&self, progress: f32) {
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.state.is_detecting() && snapshot.progress != progress {
                snapshot.progress = progress;
                true
            } else {
                false
            }
        });
    }
}

impl Counters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_received: self.received.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            frames_analyzed: self.analyzed.load(Ordering::Relaxed),
            windows_committed: self.committed.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            matches: self.matches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FaceEmbedding, LogErrorReporter};
    use camera_capture::{CameraConfig, FrameGenerator, SyntheticCamera};
    use face_analysis::{FaceBbox, FaceObservation};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use tokio::sync::Notify;
    use uuid::Uuid;

    /// Shared counters observed by the stub collaborators
    #[derive(Clone, Default)]
    struct Tally {
        analyzed: Arc<AtomicUsize>,
        analyzer_resets: Arc<AtomicUsize>,
        processed: Arc<AtomicUsize>,
        verified: Arc<AtomicUsize>,
        reported: Arc<Mutex<Vec<String>>>,
    }

    impl Tally {
        fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }

        fn reports(&self) -> Vec<String> {
            self.reported.lock().unwrap().clone()
        }
    }

    /// Reads the quality from the red channel of the first pixel (percent);
    /// zero means no face
    struct PixelQualityAnalyzer {
        tally: Tally,
    }

    impl FaceAnalyzer for PixelQualityAnalyzer {
        fn analyze(&mut self, frame: &VideoFrame) -> Option<FaceObservation> {
            self.tally.analyzed.fetch_add(1, Ordering::SeqCst);
            let red = frame.get_pixel(0, 0)?[0];
            (red > 0).then(|| FaceObservation {
                face: FaceBbox {
                    x: 0.0,
                    y: 0.0,
                    width: frame.width as f32,
                    height: frame.height as f32,
                    confidence: 1.0,
                },
                quality: red as f32 / 100.0,
            })
        }

        fn reset(&mut self) {
            self.tally.analyzer_resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct StubProcessor {
        tally: Tally,
        fail: bool,
        hold: Option<Mutex<mpsc::Receiver<()>>>,
    }

    impl FaceProcessor for StubProcessor {
        fn process(&self, _frame: &VideoFrame, _face: &FaceBbox) -> Result<FaceEmbedding, ProcessError> {
            self.tally.processed.fetch_add(1, Ordering::SeqCst);
            if let Some(hold) = &self.hold {
                let _ = hold.lock().unwrap().recv_timeout(Duration::from_secs(5));
            }
            if self.fail {
                return Err(ProcessError::Inference("model returned NaN".into()));
            }
            Ok(FaceEmbedding::normalized(vec![1.0, 0.0]).unwrap())
        }
    }

    struct StubVerifier {
        tally: Tally,
        accept: bool,
        hold: Option<Arc<Notify>>,
    }

    impl Verifier for StubVerifier {
        async fn verify(
            &self,
            _identity: &Identity,
            _embedding: &FaceEmbedding,
        ) -> Result<MatchReceipt, VerifyError> {
            self.tally.verified.fetch_add(1, Ordering::SeqCst);
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            if self.accept {
                Ok(MatchReceipt { confidence: 0.97 })
            } else {
                Err(VerifyError::Mismatch)
            }
        }
    }

    struct RecordingReporter {
        tally: Tally,
    }

    impl ErrorReporter for RecordingReporter {
        fn report(&self, error: &PipelineError) {
            LogErrorReporter.report(error);
            self.tally.reported.lock().unwrap().push(error.to_string());
        }
    }

    fn processor(tally: &Tally) -> StubProcessor {
        StubProcessor {
            tally: tally.clone(),
            fail: false,
            hold: None,
        }
    }

    fn verifier(tally: &Tally) -> StubVerifier {
        StubVerifier {
            tally: tally.clone(),
            accept: true,
            hold: None,
        }
    }

    fn build(
        config: VerificationConfig,
        tally: &Tally,
        processor: StubProcessor,
        verifier: StubVerifier,
    ) -> VerificationOrchestrator<StubProcessor, StubVerifier> {
        let collaborators = Collaborators {
            analyzer: Box::new(PixelQualityAnalyzer {
                tally: tally.clone(),
            }),
            processor,
            verifier,
            reporter: Arc::new(RecordingReporter {
                tally: tally.clone(),
            }),
        };
        VerificationOrchestrator::new(config, Identity::new(Uuid::new_v4(), "Ada"), collaborators)
            .unwrap()
    }

    /// Frame whose analyzer quality is `percent / 100`; 0 means no face
    fn frame(percent: u8) -> VideoFrame {
        VideoFrame::filled(2, 2, [percent, 0, 0])
    }

    async fn wait_for_state(
        orchestrator: &VerificationOrchestrator<StubProcessor, StubVerifier>,
        predicate: impl Fn(&VerificationState) -> bool,
    ) -> VerificationSnapshot {
        let mut rx = orchestrator.subscribe();
        let snapshot = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|snapshot| predicate(&snapshot.state)),
        )
        .await
        .expect("state not reached in time")
        .expect("orchestrator dropped")
        .clone();
        snapshot
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[test]
    fn test_requires_runtime() {
        let tally = Tally::default();
        let collaborators = Collaborators {
            analyzer: Box::new(PixelQualityAnalyzer {
                tally: tally.clone(),
            }),
            processor: processor(&tally),
            verifier: verifier(&tally),
            reporter: Arc::new(LogErrorReporter),
        };
        let result = VerificationOrchestrator::new(
            VerificationConfig::default(),
            Identity::new(Uuid::nil(), "x"),
            collaborators,
        );
        assert!(matches!(result, Err(OrchestratorError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let tally = Tally::default();
        let config = VerificationConfig {
            verify_timeout_ms: 0,
            ..Default::default()
        };
        let collaborators = Collaborators {
            analyzer: Box::new(PixelQualityAnalyzer {
                tally: tally.clone(),
            }),
            processor: processor(&tally),
            verifier: verifier(&tally),
            reporter: Arc::new(LogErrorReporter),
        };
        let result =
            VerificationOrchestrator::new(config, Identity::new(Uuid::nil(), "x"), collaborators);
        assert!(matches!(result, Err(OrchestratorError::Config(_))));
    }

    #[test]
    fn test_gate_released_when_job_never_runs() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let tally = Tally::default();
        let orchestrator = {
            let _enter = runtime.enter();
            build(Default::default(), &tally, processor(&tally), verifier(&tally))
        };
        orchestrator.start().unwrap();
        drop(runtime);

        // The job is cancelled inside spawn and its future dropped unpolled
        orchestrator.on_frame(frame(95));

        assert!(!orchestrator.is_verifying());
        assert!(orchestrator.snapshot().state.is_detecting());
        assert_eq!(Tally::count(&tally.processed), 0);
        assert_eq!(orchestrator.stats().attempts, 1);

        // Still accepting: the next committed frame claims the gate again
        orchestrator.on_frame(frame(95));
        assert_eq!(orchestrator.stats().attempts, 2);
        assert!(!orchestrator.is_verifying());
    }

    #[tokio::test]
    async fn test_frames_dropped_before_start() {
        let tally = Tally::default();
        let orchestrator = build(Default::default(), &tally, processor(&tally), verifier(&tally));

        orchestrator.on_frame(frame(95));

        assert_eq!(Tally::count(&tally.analyzed), 0);
        assert!(orchestrator.snapshot().state.is_detecting());
        assert_eq!(orchestrator.stats().frames_dropped, 1);
    }

    #[tokio::test]
    async fn test_excellent_frame_matches() {
        let tally = Tally::default();
        let orchestrator = build(Default::default(), &tally, processor(&tally), verifier(&tally));
        orchestrator.start().unwrap();

        orchestrator.on_frame(frame(95));
        assert!(orchestrator.snapshot().state.is_processing());
        assert!(orchestrator.is_verifying());

        let snapshot = wait_for_state(&orchestrator, VerificationState::is_matched).await;
        match snapshot.state {
            VerificationState::Matched {
                display_name,
                confidence,
                ..
            } => {
                assert_eq!(display_name, "Ada");
                assert_eq!(confidence, 0.97);
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(snapshot.progress, 1.0);
        assert!(!orchestrator.is_verifying());

        // Matched is terminal: later frames are not analyzed
        orchestrator.on_frame(frame(95));
        assert_eq!(Tally::count(&tally.analyzed), 1);
        assert_eq!(Tally::count(&tally.verified), 1);

        let stats = orchestrator.stats();
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.matches, 1);
    }

    #[tokio::test]
    async fn test_processor_failure_returns_to_detecting() {
        let tally = Tally::default();
        let failing = StubProcessor {
            fail: true,
            ..processor(&tally)
        };
        let orchestrator = build(Default::default(), &tally, failing, verifier(&tally));
        orchestrator.start().unwrap();

        assert!(orchestrator.snapshot().state.is_detecting());
        orchestrator.on_frame(frame(95));
        assert!(orchestrator.snapshot().state.is_processing());

        wait_for_state(&orchestrator, VerificationState::is_detecting).await;
        assert_eq!(tally.reports(), vec!["Embedding inference failed: model returned NaN"]);
        assert!(!orchestrator.is_verifying());
        assert_eq!(Tally::count(&tally.verified), 0);

        // Pipeline accepts new attempts
        orchestrator.on_frame(frame(50));
        assert_eq!(Tally::count(&tally.analyzed), 2);
        assert_eq!(orchestrator.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_verifier_rejection_is_reported() {
        let tally = Tally::default();
        let rejecting = StubVerifier {
            accept: false,
            ..verifier(&tally)
        };
        let orchestrator = build(Default::default(), &tally, processor(&tally), rejecting);
        orchestrator.start().unwrap();

        orchestrator.on_frame(frame(99));
        wait_for_state(&orchestrator, VerificationState::is_detecting).await;

        assert_eq!(tally.reports(), vec!["Face does not match the claimed identity"]);
        assert!(!orchestrator.is_verifying());
    }

    #[tokio::test]
    async fn test_verifier_timeout_is_reported() {
        let tally = Tally::default();
        let stalled = StubVerifier {
            hold: Some(Arc::new(Notify::new())),
            ..verifier(&tally)
        };
        let config = VerificationConfig {
            verify_timeout_ms: 20,
            ..Default::default()
        };
        let orchestrator = build(config, &tally, processor(&tally), stalled);
        orchestrator.start().unwrap();

        orchestrator.on_frame(frame(95));
        wait_for_state(&orchestrator, VerificationState::is_detecting).await;

        assert_eq!(tally.reports(), vec!["Verification timed out after 20ms"]);
        assert!(!orchestrator.is_verifying());
    }

    #[tokio::test]
    async fn test_flood_while_verifying_skips_analysis() {
        let tally = Tally::default();
        let stalled = StubVerifier {
            hold: Some(Arc::new(Notify::new())),
            ..verifier(&tally)
        };
        let orchestrator = build(Default::default(), &tally, processor(&tally), stalled);
        orchestrator.start().unwrap();

        orchestrator.on_frame(frame(95));
        wait_until(|| Tally::count(&tally.verified) == 1).await;

        for _ in 0..2000 {
            orchestrator.on_frame(frame(95));
        }

        assert_eq!(Tally::count(&tally.analyzed), 1);
        assert_eq!(Tally::count(&tally.processed), 1);
        let stats = orchestrator.stats();
        assert_eq!(stats.frames_dropped, 2000);
        assert_eq!(stats.attempts, 1);
        assert!(orchestrator.snapshot().state.is_processing());

        orchestrator.stop();
    }

    #[tokio::test]
    async fn test_stop_during_verification_never_matches() {
        let tally = Tally::default();
        let release = Arc::new(Notify::new());
        let held = StubVerifier {
            hold: Some(release.clone()),
            ..verifier(&tally)
        };
        let orchestrator = build(Default::default(), &tally, processor(&tally), held);
        orchestrator.start().unwrap();

        orchestrator.on_frame(frame(95));
        wait_until(|| Tally::count(&tally.verified) == 1).await;

        orchestrator.stop();
        assert!(orchestrator.snapshot().state.is_detecting());
        assert!(!orchestrator.is_verifying());

        // Let the superseded verifier call succeed
        release.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(orchestrator.snapshot().state.is_detecting());
        assert!(tally.reports().is_empty());
        assert_eq!(orchestrator.stats().matches, 0);
    }

    #[tokio::test]
    async fn test_stop_before_network_call_skips_verifier() {
        let tally = Tally::default();
        let (go, hold) = mpsc::channel();
        let held = StubProcessor {
            hold: Some(Mutex::new(hold)),
            ..processor(&tally)
        };
        let orchestrator = build(Default::default(), &tally, held, verifier(&tally));
        orchestrator.start().unwrap();

        orchestrator.on_frame(frame(95));
        wait_until(|| Tally::count(&tally.processed) == 1).await;

        orchestrator.stop();
        go.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(Tally::count(&tally.verified), 0);
        assert!(orchestrator.snapshot().state.is_detecting());
        assert!(!orchestrator.is_verifying());
        assert!(tally.reports().is_empty());
    }

    #[tokio::test]
    async fn test_restart_after_stop_ignores_stale_job() {
        let tally = Tally::default();
        let release = Arc::new(Notify::new());
        let held = StubVerifier {
            hold: Some(release.clone()),
            ..verifier(&tally)
        };
        let orchestrator = build(Default::default(), &tally, processor(&tally), held);
        orchestrator.start().unwrap();
        orchestrator.on_frame(frame(95));
        wait_until(|| Tally::count(&tally.verified) == 1).await;

        orchestrator.stop();
        orchestrator.start().unwrap();
        orchestrator.on_frame(frame(95));
        wait_until(|| Tally::count(&tally.verified) == 2).await;
        assert!(orchestrator.is_verifying());

        // Both calls succeed; only the current attempt may publish
        release.notify_waiters();
        let snapshot = wait_for_state(&orchestrator, VerificationState::is_matched).await;
        assert!(snapshot.state.is_matched());
        assert_eq!(orchestrator.stats().matches, 1);
        assert!(!orchestrator.is_verifying());
    }

    #[tokio::test]
    async fn test_face_loss_resets_window() {
        let tally = Tally::default();
        let orchestrator = build(Default::default(), &tally, processor(&tally), verifier(&tally));
        orchestrator.start().unwrap();
        let resets_after_start = Tally::count(&tally.analyzer_resets);

        orchestrator.on_frame(frame(50));
        assert!(orchestrator.shared.collector.is_collecting());

        orchestrator.on_frame(frame(0));
        assert!(!orchestrator.shared.collector.is_collecting());
        assert_eq!(Tally::count(&tally.analyzer_resets), resets_after_start + 1);
        assert_eq!(orchestrator.snapshot().progress, 0.0);

        // No window open, so a second miss does not reset again
        orchestrator.on_frame(frame(0));
        assert_eq!(Tally::count(&tally.analyzer_resets), resets_after_start + 1);
        assert!(orchestrator.snapshot().state.is_detecting());
    }

    #[tokio::test]
    async fn test_window_commits_after_duration() {
        let tally = Tally::default();
        let config = VerificationConfig {
            collector: crate::CollectorConfig {
                window_ms: 30,
                ..Default::default()
            },
            ..Default::default()
        };
        let orchestrator = build(config, &tally, processor(&tally), verifier(&tally));
        orchestrator.start().unwrap();

        orchestrator.on_frame(frame(30));
        orchestrator.on_frame(frame(50));
        assert!(orchestrator.snapshot().state.is_detecting());

        tokio::time::sleep(Duration::from_millis(40)).await;
        orchestrator.on_frame(frame(40));
        assert!(orchestrator.snapshot().state.is_processing());

        wait_for_state(&orchestrator, VerificationState::is_matched).await;
        assert_eq!(orchestrator.stats().windows_committed, 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let tally = Tally::default();
        let orchestrator = build(Default::default(), &tally, processor(&tally), verifier(&tally));

        orchestrator.stop();
        orchestrator.stop();
        orchestrator.start().unwrap();
        orchestrator.start().unwrap();
        orchestrator.stop();
        orchestrator.stop();

        assert!(orchestrator.snapshot().state.is_detecting());
        assert!(!orchestrator.is_verifying());
    }

    #[tokio::test]
    async fn test_start_after_match_begins_new_attempt() {
        let tally = Tally::default();
        let orchestrator = build(Default::default(), &tally, processor(&tally), verifier(&tally));
        orchestrator.start().unwrap();
        orchestrator.on_frame(frame(95));
        wait_for_state(&orchestrator, VerificationState::is_matched).await;

        orchestrator.start().unwrap();
        assert!(orchestrator.snapshot().state.is_detecting());
        orchestrator.on_frame(frame(40));
        assert_eq!(Tally::count(&tally.analyzed), 2);
    }

    #[tokio::test]
    async fn test_capture_source_drives_pipeline() {
        let tally = Tally::default();
        let generator: FrameGenerator = Box::new(|_: u32| Some(frame(95)));
        let camera = SyntheticCamera::new(
            CameraConfig {
                fps: 200,
                ..Default::default()
            },
            generator,
        );
        let orchestrator = build(Default::default(), &tally, processor(&tally), verifier(&tally))
            .with_capture(Box::new(camera));

        orchestrator.start().unwrap();
        assert!(orchestrator.is_capturing());

        wait_for_state(&orchestrator, VerificationState::is_matched).await;
        orchestrator.stop();

        assert!(!orchestrator.is_capturing());
        assert!(orchestrator.snapshot().state.is_detecting());
        assert_eq!(orchestrator.stats().attempts, 1);
    }
}
