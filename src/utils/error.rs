//! Error types and handling
//!
//! Error taxonomy shared by the capture surfaces and the session controller.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which authorization blocked a recording attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionKind {
    Camera,
    Microphone,
    CameraAndMicrophone,
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionKind::Camera => write!(
                f,
                "Camera access is blocked. Allow camera permissions to start an emergency recording."
            ),
            PermissionKind::Microphone => write!(
                f,
                "Microphone access is blocked. Enable microphone permissions to capture audio during recording."
            ),
            PermissionKind::CameraAndMicrophone => write!(
                f,
                "Camera and microphone access are blocked. Update your permissions to record."
            ),
        }
    }
}

/// Capture-wide error type
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("{0}")]
    UnsupportedEnvironment(String),

    #[error("{0}")]
    PermissionDenied(PermissionKind),

    #[error("Unable to access camera or microphone: {0}")]
    AcquisitionFailure(String),

    #[error("{0}")]
    RecordingFailure(String),

    #[error("Dual camera unavailable: {0}")]
    DualCameraUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CaptureError {
    /// Stable machine-readable code for the IPC surface
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::UnsupportedEnvironment(_) => "UNSUPPORTED_ENVIRONMENT",
            CaptureError::PermissionDenied(_) => "PERMISSION_DENIED",
            CaptureError::AcquisitionFailure(_) => "ACQUISITION_FAILURE",
            CaptureError::RecordingFailure(_) => "RECORDING_FAILURE",
            CaptureError::DualCameraUnavailable(_) => "DUAL_CAMERA_UNAVAILABLE",
            CaptureError::Config(_) => "CONFIG_ERROR",
            CaptureError::Io(_) => "IO_ERROR",
            CaptureError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Error response for frontend
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<CaptureError> for ErrorResponse {
    fn from(error: CaptureError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;
