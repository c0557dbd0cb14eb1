//! Recording state management
//!
//! Defines the controller state machine, per-session states and the
//! snapshot handed to the UI.

use crate::capture::permissions::Permissions;
use crate::capture::support::SupportState;
use crate::capture::traits::{PermissionName, PermissionState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which camera a session records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRole {
    Front,
    Back,
}

impl SessionRole {
    /// Message surfaced when the recorder fails without saying why
    pub fn fallback_error(self) -> &'static str {
        match self {
            SessionRole::Front => "A recording error occurred.",
            SessionRole::Back => "Background camera recording failed.",
        }
    }
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Front => write!(f, "front"),
            SessionRole::Back => write!(f, "back"),
        }
    }
}

/// Lifecycle of a single recorder session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Recording,
    Stopping,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }
}

/// Controller state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturePhase {
    /// No recording in progress
    #[default]
    Idle,
    /// Checking permissions and opening devices
    Acquiring,
    /// At least the front session is recording
    Recording,
    /// Waiting for recorders to finalize
    Stopping,
    /// A session failed; teardown pending
    Failed,
}

/// A finished recording, addressable through a revocable URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureArtifact {
    pub url: String,
    pub mime_type: String,
    pub size_bytes: usize,
}

/// Aggregate flags owned by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DualCaptureState {
    pub recording: bool,
    pub dual_active: bool,

    /// `None` until devices have been enumerated successfully
    pub supports_dual_camera: Option<bool>,

    pub front_artifact: Option<CaptureArtifact>,
    pub back_artifact: Option<CaptureArtifact>,
    pub front_mime_type: String,
    pub back_mime_type: String,
    pub started_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl DualCaptureState {
    pub fn new(default_mime_type: &str) -> Self {
        Self {
            recording: false,
            dual_active: false,
            supports_dual_camera: None,
            front_artifact: None,
            back_artifact: None,
            front_mime_type: default_mime_type.to_string(),
            back_mime_type: default_mime_type.to_string(),
            started_at: None,
            error: None,
        }
    }

    pub fn artifact_mut(&mut self, role: SessionRole) -> &mut Option<CaptureArtifact> {
        match role {
            SessionRole::Front => &mut self.front_artifact,
            SessionRole::Back => &mut self.back_artifact,
        }
    }

    pub fn set_mime_type(&mut self, role: SessionRole, mime_type: &str) {
        match role {
            SessionRole::Front => self.front_mime_type = mime_type.to_string(),
            SessionRole::Back => self.back_mime_type = mime_type.to_string(),
        }
    }
}

/// Read-only view of the controller for the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSnapshot {
    pub phase: CapturePhase,
    pub recording: bool,
    pub dual_active: bool,
    pub supports_dual_camera: Option<bool>,
    pub front_recording_url: Option<String>,
    pub back_recording_url: Option<String>,
    pub front_mime_type: String,
    pub back_mime_type: String,
    pub recording_started_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub support: SupportState,
    pub permissions_supported: bool,
    pub permissions: Permissions,
}

/// Events emitted by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CaptureEvent {
    /// Front session recording; `dual` if the back one joined
    Started { dual: bool },
    /// Back camera lost or never came up; front unaffected
    Degraded { reason: String },
    /// Both sessions torn down
    Stopped,
    /// A session produced its artifact
    #[serde(rename_all = "camelCase")]
    ArtifactReady { role: SessionRole, url: String },
    /// Start failed or a session failed
    Error { message: String },
    /// Platform pushed a permission change
    PermissionChanged { name: PermissionName, state: PermissionState },
}
