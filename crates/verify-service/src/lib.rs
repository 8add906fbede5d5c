//! Face Verification Service
//!
//! Hosts one verification orchestrator behind a small HTTP API, wired to a
//! synthetic camera and the demo collaborators.

use axum::{
    routing::{get, post},
    Router,
};
use camera_capture::SyntheticCamera;
use face_analysis::TrackingAnalyzer;
use face_verify::{
    Collaborators, FaceProcessor, Identity, LogErrorReporter, OrchestratorError, ProcessError,
    VerificationOrchestrator,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};

pub mod config;
pub mod demo;
mod routes;

pub use crate::config::{AppConfig, LogFormat, LoggingConfig};

use demo::{BrightBlobDetector, GalleryVerifier, ThumbnailEmbedder};

/// Orchestrator wired to the demo collaborators
pub type DemoOrchestrator = VerificationOrchestrator<ThumbnailEmbedder, GalleryVerifier>;

/// Service error types
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("Failed to enroll target identity: {0}")]
    Enrollment(#[from] ProcessError),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Failed to install metrics exporter: {0}")]
    Metrics(String),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state shared across handlers
pub struct AppState {
    /// Verification pipeline
    pub orchestrator: DemoOrchestrator,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: Instant,
    /// Prometheus exporter, when enabled
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create new application state
    pub fn new(orchestrator: DemoOrchestrator, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            orchestrator,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
            metrics,
        }
    }
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(routes::health::health))
        .route("/api/v1/verification", get(routes::verification::get_status))
        .route("/api/v1/verification/start", post(routes::verification::start))
        .route("/api/v1/verification/stop", post(routes::verification::stop))
        .route("/metrics", get(routes::health::metrics))
        .with_state(state)
}

/// Build the orchestrator with the synthetic camera and demo collaborators.
///
/// The target identity is enrolled from the synthetic scene's reference face.
/// Must be called from within a tokio runtime.
pub fn build_orchestrator(config: &AppConfig) -> Result<DemoOrchestrator, ServiceError> {
    let embedder = ThumbnailEmbedder::default();
    let verifier = GalleryVerifier::new(
        config.demo.match_threshold,
        Duration::from_millis(config.demo.verifier_latency_ms),
    );

    let target = Identity::new(config.target.id, config.target.display_name.clone());
    let (reference_frame, reference_face) = demo::enrollment_frame(&config.camera);
    verifier.enroll(target.id, embedder.process(&reference_frame, &reference_face)?);

    let analyzer = TrackingAnalyzer::new(
        BrightBlobDetector::new(config.demo.luma_threshold),
        config.analyzer.clone(),
    );
    let camera = SyntheticCamera::new(config.camera.clone(), demo::approaching_face(&config.camera));

    let orchestrator = VerificationOrchestrator::new(
        config.verification.clone(),
        target,
        Collaborators {
            analyzer: Box::new(analyzer),
            processor: embedder,
            verifier,
            reporter: Arc::new(LogErrorReporter),
        },
    )?
    .with_capture(Box::new(camera));

    Ok(orchestrator)
}

/// Parse a configured log level
pub fn parse_level(level: &str) -> Result<Level, ServiceError> {
    level
        .trim()
        .parse::<Level>()
        .map_err(|_| ServiceError::Logging(format!("invalid log level '{}'", level)))
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> Result<(), ServiceError> {
    let level = parse_level(&config.level)?;
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true);

    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    result.map_err(|e| ServiceError::Logging(e.to_string()))
}

/// Install the Prometheus recorder and describe the pipeline metrics
pub fn install_metrics() -> Result<PrometheusHandle, ServiceError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServiceError::Metrics(e.to_string()))?;
    face_verify::describe_metrics();
    Ok(handle)
}

/// Run the server until Ctrl-C
pub async fn run_server(config: AppConfig) -> Result<(), ServiceError> {
    let metrics = if config.server.metrics {
        Some(install_metrics()?)
    } else {
        None
    };

    let orchestrator = build_orchestrator(&config)?;
    if config.demo.auto_start {
        orchestrator.start()?;
    }

    let state = Arc::new(AppState::new(orchestrator, metrics));
    let app = create_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    info!("Starting verification server on {}", config.server.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let lifecycle = state.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || lifecycle.orchestrator.stop()).await {
        warn!("Failed to stop verification cleanly: {}", e);
    }
    info!("Verification server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
}
