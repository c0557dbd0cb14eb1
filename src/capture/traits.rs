//! Capture trait definitions
//!
//! Platform-agnostic surfaces the session controller consumes: device
//! enumeration, stream acquisition, recording and permission queries.

use crate::utils::error::CaptureResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Which physical camera a stream request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// User-facing ("front") camera
    User,
    /// Environment-facing ("back") camera
    Environment,
}

/// Audio processing requested alongside a video stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Constraints for a single stream request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConstraints {
    /// Preferred camera
    pub facing_mode: FacingMode,

    /// Audio settings, `None` for a video-only stream
    pub audio: Option<AudioConstraints>,
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// One hardware-backed track of a stream
pub trait MediaTrack: Send + Sync {
    fn kind(&self) -> TrackKind;

    /// Release the underlying device. Must be safe to call on a stopped track.
    fn stop(&self);

    fn is_live(&self) -> bool;
}

/// An acquired media stream
pub trait MediaStream: Send + Sync {
    /// Unique stream ID
    fn id(&self) -> &str;

    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;
}

/// Shared reference to an acquired stream
pub type StreamHandle = Arc<dyn MediaStream>;

/// Stop every track of a stream
pub fn stop_all_tracks(stream: &dyn MediaStream) {
    for track in stream.tracks() {
        track.stop();
    }
}

/// Device enumeration and stream acquisition
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open a stream matching the constraints
    async fn open_stream(&self, constraints: &StreamConstraints) -> CaptureResult<StreamHandle>;

    /// Number of video input devices currently present
    async fn count_video_inputs(&self) -> CaptureResult<usize>;
}

/// Notification delivered by a recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// Encoded media produced since the previous flush
    Data(Vec<u8>),
    /// Recorder finished; no more data follows
    Stopped,
    /// Recorder failed, with the platform's message if it gave one
    Error(Option<String>),
}

/// Channel a recorder reports its notifications on
pub type RecorderEventSender = mpsc::UnboundedSender<RecorderEvent>;

/// A recorder bound to one stream
pub trait MediaRecorder: Send {
    /// Begin recording, flushing data every `timeslice`
    fn start(&mut self, timeslice: Duration) -> CaptureResult<()>;

    /// Ask the recorder to finalize. Emits `RecorderEvent::Stopped` once done.
    fn stop(&mut self);

    fn is_active(&self) -> bool;
}

/// Factory for recorders plus codec support queries
pub trait RecorderBackend: Send + Sync {
    /// Whether `is_type_supported` can be consulted at all
    fn has_type_probe(&self) -> bool {
        true
    }

    fn is_type_supported(&self, mime_type: &str) -> CaptureResult<bool>;

    fn create(
        &self,
        stream: StreamHandle,
        mime_type: &str,
        events: RecorderEventSender,
    ) -> CaptureResult<Box<dyn MediaRecorder>>;
}

/// Permissions the controller cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionName {
    Camera,
    Microphone,
}

/// Authorization state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Denied,
    Prompt,
}

/// Result of a permission query: the current state plus a change subscription
#[derive(Debug)]
pub struct PermissionStatus {
    pub state: PermissionState,
    pub changes: watch::Receiver<PermissionState>,
}

/// Permission query surface
#[async_trait]
pub trait PermissionApi: Send + Sync {
    async fn query(&self, name: PermissionName) -> CaptureResult<PermissionStatus>;
}

/// Which platform surfaces the runtime exposes. `None` means absent.
#[derive(Clone, Default)]
pub struct PlatformCapabilities {
    pub devices: Option<Arc<dyn MediaDevices>>,
    pub recorder: Option<Arc<dyn RecorderBackend>>,
    pub permissions: Option<Arc<dyn PermissionApi>>,
}

impl std::fmt::Debug for PlatformCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformCapabilities")
            .field("devices", &self.devices.is_some())
            .field("recorder", &self.recorder.is_some())
            .field("permissions", &self.permissions.is_some())
            .finish()
    }
}
