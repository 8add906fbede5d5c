//! Layered service configuration
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults
//! 2. Optional TOML file (`FACE_VERIFY_CONFIG`, default `face-verify.toml`)
//! 3. Environment variables, e.g. `FACE_VERIFY__SERVER__BIND_ADDR`

use camera_capture::CameraConfig;
use ::config::{Config, Environment, File, FileFormat};
use face_analysis::AnalyzerConfig;
use face_verify::VerificationConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "FACE_VERIFY_CONFIG";

/// Configuration file read when `FACE_VERIFY_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "face-verify.toml";

const ENV_PREFIX: &str = "FACE_VERIFY";

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub camera: CameraConfig,
    pub analyzer: AnalyzerConfig,
    pub verification: VerificationConfig,
    pub target: TargetConfig,
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Serve Prometheus metrics at `/metrics`
    pub metrics: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            metrics: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Max level: trace, debug, info, warn or error
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Identity the service verifies against
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub id: Uuid,
    pub display_name: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: "Demo User".to_string(),
        }
    }
}

/// Tuning for the built-in demo collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Pixels brighter than this count as face
    pub luma_threshold: u8,
    /// Cosine similarity required for a match
    pub match_threshold: f32,
    /// Simulated verifier round trip (milliseconds)
    pub verifier_latency_ms: u64,
    /// Start verifying as soon as the server is up
    pub auto_start: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            luma_threshold: 180,
            match_threshold: 0.8,
            verifier_latency_ms: 150,
            auto_start: false,
        }
    }
}

impl AppConfig {
    /// Load from the file named by `FACE_VERIFY_CONFIG` and the environment
    pub fn load() -> Result<Self, ::config::ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    /// Load from an explicit file path (may be missing) and the environment
    pub fn load_from(path: &str) -> Result<Self, ::config::ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::new(path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
