//! Shared utilities

pub mod config;
pub mod error;

pub use config::RecorderConfig;
pub use error::{CaptureError, CaptureResult, ErrorResponse, PermissionKind};
