//! Verification configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ConfigError;

/// Default collection window (800 ms)
pub const DEFAULT_WINDOW_MS: u64 = 800;

/// Default quality at which a window commits immediately
pub const DEFAULT_EXCELLENT_QUALITY: f32 = 0.9;

/// Default timeout for one verifier round trip
pub const DEFAULT_VERIFY_TIMEOUT_MS: u64 = 10_000;

/// Best-frame collector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// How long to look for a better frame before committing (milliseconds)
    pub window_ms: u64,

    /// Quality that closes the window immediately
    pub excellent_quality: f32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            excellent_quality: DEFAULT_EXCELLENT_QUALITY,
        }
    }
}

impl CollectorConfig {
    pub fn window_duration(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_ms == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if !self.excellent_quality.is_finite() {
            return Err(ConfigError::InvalidThreshold(self.excellent_quality));
        }
        Ok(())
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub collector: CollectorConfig,

    /// Upper bound on one verifier call (milliseconds)
    pub verify_timeout_ms: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            collector: CollectorConfig::default(),
            verify_timeout_ms: DEFAULT_VERIFY_TIMEOUT_MS,
        }
    }
}

impl VerificationConfig {
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.collector.validate()?;
        if self.verify_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VerificationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.collector.window_duration(), Duration::from_millis(800));
        assert_eq!(config.collector.excellent_quality, 0.9);
    }

    #[test]
    fn test_rejects_degenerate_values() {
        let zero_window = CollectorConfig {
            window_ms: 0,
            ..Default::default()
        };
        assert!(matches!(zero_window.validate(), Err(ConfigError::ZeroWindow)));

        let nan = CollectorConfig {
            excellent_quality: f32::NAN,
            ..Default::default()
        };
        assert!(matches!(nan.validate(), Err(ConfigError::InvalidThreshold(_))));

        let no_timeout = VerificationConfig {
            verify_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(no_timeout.validate(), Err(ConfigError::ZeroTimeout)));
    }
}
