//! Recorder configuration
//!
//! Codec preference, flush cadence and per-camera constraints. Every field
//! has a default so partial JSON files are accepted.

use crate::capture::acquire::default_constraints;
use crate::capture::mime::{DEFAULT_MIME_TYPE, MIME_TYPE_PREFERENCE};
use crate::capture::traits::StreamConstraints;
use crate::recorder::state::SessionRole;
use crate::utils::error::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable pointing at a JSON config file
pub const CONFIG_PATH_ENV: &str = "EMERGENCY_CAPTURE_CONFIG";

/// Environment variable overriding the chunk flush interval
pub const TIMESLICE_ENV: &str = "EMERGENCY_CAPTURE_TIMESLICE_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Codec preference, most preferred first
    pub mime_preference: Vec<String>,

    /// Used when no preference can be confirmed
    pub default_mime_type: String,

    /// Chunk flush interval in milliseconds
    pub timeslice_ms: u64,

    /// How long stop waits for recorders to finalize
    pub finalize_timeout_ms: u64,

    /// Front camera request
    pub front: StreamConstraints,

    /// Back camera request
    pub back: StreamConstraints,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            mime_preference: MIME_TYPE_PREFERENCE.iter().map(|m| m.to_string()).collect(),
            default_mime_type: DEFAULT_MIME_TYPE.to_string(),
            timeslice_ms: 1000,
            finalize_timeout_ms: 5000,
            front: default_constraints(SessionRole::Front),
            back: default_constraints(SessionRole::Back),
        }
    }
}

impl RecorderConfig {
    pub fn timeslice(&self) -> Duration {
        Duration::from_millis(self.timeslice_ms)
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.finalize_timeout_ms)
    }

    /// Load from a JSON file and validate
    pub fn from_json_file(path: impl AsRef<Path>) -> CaptureResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded recorder config from {}", path.display());
        Ok(config)
    }

    /// Defaults, then the file named by `EMERGENCY_CAPTURE_CONFIG`, then the
    /// timeslice override
    pub fn from_env() -> CaptureResult<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_json_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(raw) = std::env::var(TIMESLICE_ENV) {
            config.timeslice_ms = raw.trim().parse().map_err(|_| {
                CaptureError::Config(format!("{TIMESLICE_ENV} must be milliseconds, got {raw:?}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CaptureResult<()> {
        if self.mime_preference.is_empty() {
            return Err(CaptureError::Config("mimePreference must not be empty".to_string()));
        }
        if self.default_mime_type.trim().is_empty() {
            return Err(CaptureError::Config("defaultMimeType must not be empty".to_string()));
        }
        if self.timeslice_ms == 0 {
            return Err(CaptureError::Config("timesliceMs must be greater than zero".to_string()));
        }
        Ok(())
    }
}
