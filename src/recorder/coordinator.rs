//! Dual-camera recording coordinator
//!
//! Gates on support and permissions, brings up the front session, then
//! tries to add the back session. Teardown always releases every stream.
//!
//! All aggregate state sits behind one mutex that is never held across an
//! `.await`. Each start attempt and each stop bumps `cycle`; a start that
//! resumes after a suspension point and finds a different cycle lost a race
//! with `stop_recording` and releases whatever it just acquired.

use super::artifacts::ArtifactStore;
use super::preview::{PreviewSlots, PreviewStream};
use super::session::{FailureHook, RecorderSession};
use super::state::{
    CaptureEvent, CapturePhase, CaptureSnapshot, DualCaptureState, SessionRole, SessionState,
};
use crate::capture::acquire::acquire_stream;
use crate::capture::mime::negotiate_mime_type;
use crate::capture::permissions::{PermissionMonitor, Permissions};
use crate::capture::support::SupportState;
use crate::capture::traits::{
    stop_all_tracks, MediaDevices, PermissionState, PlatformCapabilities, RecorderBackend,
    StreamHandle,
};
use crate::utils::config::RecorderConfig;
use crate::utils::error::{CaptureError, CaptureResult, PermissionKind};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

const UNSUPPORTED_FALLBACK: &str = "Recording is not supported on this device.";

struct ControllerInner {
    phase: CapturePhase,
    cycle: u64,
    state: DualCaptureState,
    front: Option<RecorderSession>,
    back: Option<RecorderSession>,
}

impl ControllerInner {
    fn session(&self, role: SessionRole) -> Option<&RecorderSession> {
        match role {
            SessionRole::Front => self.front.as_ref(),
            SessionRole::Back => self.back.as_ref(),
        }
    }

    fn take_sessions(&mut self) -> Vec<RecorderSession> {
        [self.front.take(), self.back.take()]
            .into_iter()
            .flatten()
            .collect()
    }
}

struct ControllerShared {
    config: RecorderConfig,
    /// True while a stop is finalizing sessions
    stopping: watch::Sender<bool>,
    capabilities: PlatformCapabilities,
    support: SupportState,
    permissions: PermissionMonitor,
    artifacts: ArtifactStore,
    previews: PreviewSlots,
    events: broadcast::Sender<CaptureEvent>,
    inner: Mutex<ControllerInner>,
}

impl Drop for ControllerShared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        for mut session in inner.take_sessions() {
            session.abort();
        }
        for artifact in [inner.state.front_artifact.take(), inner.state.back_artifact.take()]
            .into_iter()
            .flatten()
        {
            self.artifacts.revoke(&artifact.url);
        }
        self.permissions.teardown();
    }
}

/// Leaves `Stopping` and wakes concurrent stops, even if the stop future is dropped
struct StopGuard<'a> {
    shared: &'a ControllerShared,
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.phase == CapturePhase::Stopping {
                inner.phase = CapturePhase::Idle;
            }
        }
        self.shared.stopping.send_replace(false);
    }
}

/// Orchestrates the front and back recorder sessions
#[derive(Clone)]
pub struct DualCaptureController {
    shared: Arc<ControllerShared>,
}

impl DualCaptureController {
    /// Create a controller. Support is probed once, here.
    pub fn new(capabilities: PlatformCapabilities, config: RecorderConfig) -> Self {
        let (events, _) = broadcast::channel(100);
        let support = SupportState::probe(&capabilities);
        if !support.supported {
            tracing::warn!(
                "Recording unsupported: {}",
                support.reason.as_deref().unwrap_or(UNSUPPORTED_FALLBACK)
            );
        }

        let permissions = PermissionMonitor::new(capabilities.permissions.clone(), events.clone());
        let state = DualCaptureState::new(&config.default_mime_type);

        Self {
            shared: Arc::new(ControllerShared {
                config,
                stopping: watch::channel(false).0,
                capabilities,
                support,
                permissions,
                artifacts: ArtifactStore::new(),
                previews: PreviewSlots::default(),
                events,
                inner: Mutex::new(ControllerInner {
                    phase: CapturePhase::Idle,
                    cycle: 0,
                    state,
                    front: None,
                    back: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.shared.config
    }

    pub fn support(&self) -> &SupportState {
        &self.shared.support
    }

    pub fn phase(&self) -> CapturePhase {
        self.shared.inner.lock().phase
    }

    /// State of the live session for `role`, if any
    pub fn session_state(&self, role: SessionRole) -> Option<SessionState> {
        self.shared.inner.lock().session(role).map(|s| s.state())
    }

    /// Subscribe to controller events
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.shared.events.subscribe()
    }

    /// The stream currently bound for preview in `role`'s slot
    pub fn preview(&self, role: SessionRole) -> Option<PreviewStream> {
        self.shared.previews.current(role)
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.shared.artifacts
    }

    /// Current permission snapshot, following platform change notifications
    pub fn permissions(&self) -> Permissions {
        self.shared.permissions.current()
    }

    pub async fn refresh_permissions(&self) -> Permissions {
        self.shared.permissions.refresh().await
    }

    /// Refresh permissions in the background, e.g. right after construction
    pub fn spawn_permission_refresh(&self) -> JoinHandle<Permissions> {
        let controller = self.clone();
        tokio::spawn(async move { controller.refresh_permissions().await })
    }

    /// Time since recording started
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let inner = self.shared.inner.lock();
        if !inner.state.recording {
            return None;
        }
        inner.state.started_at.map(|started| Utc::now() - started)
    }

    pub fn snapshot(&self) -> CaptureSnapshot {
        let inner = self.shared.inner.lock();
        let state = &inner.state;
        CaptureSnapshot {
            phase: inner.phase,
            recording: state.recording,
            dual_active: state.dual_active,
            supports_dual_camera: state.supports_dual_camera,
            front_recording_url: state.front_artifact.as_ref().map(|a| a.url.clone()),
            back_recording_url: state.back_artifact.as_ref().map(|a| a.url.clone()),
            front_mime_type: state.front_mime_type.clone(),
            back_mime_type: state.back_mime_type.clone(),
            recording_started_at: state.started_at,
            error: state.error.clone(),
            support: self.shared.support.clone(),
            permissions_supported: self.shared.permissions.is_supported(),
            permissions: self.shared.permissions.current(),
        }
    }

    /// Start recording. Returns true once the front session is recording,
    /// whatever happens to the back camera.
    pub async fn start_recording(&self) -> bool {
        let cycle = {
            let mut inner = self.shared.inner.lock();
            match inner.phase {
                CapturePhase::Recording => {
                    tracing::debug!("Start requested while already recording");
                    return true;
                }
                CapturePhase::Acquiring | CapturePhase::Stopping | CapturePhase::Failed => {
                    tracing::warn!("Start requested while {:?}; ignoring", inner.phase);
                    return false;
                }
                CapturePhase::Idle => {}
            }

            if !self.shared.support.supported {
                let reason = self
                    .shared
                    .support
                    .reason
                    .clone()
                    .unwrap_or_else(|| UNSUPPORTED_FALLBACK.to_string());
                let error = CaptureError::UnsupportedEnvironment(reason);
                tracing::warn!("Cannot start recording: {}", error);
                inner.state.error = Some(error.to_string());
                return false;
            }

            inner.cycle += 1;
            inner.phase = CapturePhase::Acquiring;
            inner.state.error = None;
            inner.cycle
        };

        self.clear_recordings();
        tracing::info!("Starting emergency recording");

        match self.run_start(cycle).await {
            Ok(started) => started,
            Err(e) => {
                self.rollback(cycle, e);
                false
            }
        }
    }

    async fn run_start(&self, cycle: u64) -> CaptureResult<bool> {
        let permissions = self.shared.permissions.refresh().await;
        if self.shared.permissions.is_supported() {
            check_permissions(&permissions)?;
        }
        if !self.is_current(cycle) {
            return Ok(false);
        }

        let (devices, recorder) = match (
            self.shared.capabilities.devices.clone(),
            self.shared.capabilities.recorder.clone(),
        ) {
            (Some(devices), Some(recorder)) => (devices, recorder),
            _ => {
                return Err(CaptureError::UnsupportedEnvironment(
                    UNSUPPORTED_FALLBACK.to_string(),
                ))
            }
        };

        let front_stream =
            acquire_stream(devices.as_ref(), SessionRole::Front, &self.shared.config.front).await?;
        if !self.is_current(cycle) {
            tracing::info!("Front stream granted after stop; releasing it");
            stop_all_tracks(front_stream.as_ref());
            return Ok(false);
        }

        // The front session must be recording before the back camera is touched
        let front = self.start_session(cycle, SessionRole::Front, front_stream, recorder.as_ref())?;
        if !self.install(cycle, front) {
            return Ok(false);
        }

        let supports_dual = match devices.count_video_inputs().await {
            Ok(count) => {
                tracing::debug!("{} video input(s) present", count);
                Some(count > 1)
            }
            Err(e) => {
                tracing::warn!("Device enumeration failed: {}", e);
                None
            }
        };
        if !self.is_current(cycle) {
            return Ok(false);
        }
        self.shared.inner.lock().state.supports_dual_camera = supports_dual;

        if supports_dual == Some(true) {
            match self.start_back(cycle, devices.as_ref(), recorder.as_ref()).await {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(e) => self.degrade(cycle, e),
            }
        } else {
            tracing::info!(
                "{}; recording front camera only",
                CaptureError::DualCameraUnavailable("fewer than two video inputs".to_string())
            );
        }

        let dual = {
            let mut inner = self.shared.inner.lock();
            if inner.cycle != cycle || inner.phase != CapturePhase::Acquiring {
                return Ok(false);
            }
            let dual = inner
                .back
                .as_ref()
                .is_some_and(|back| back.state() == SessionState::Recording);
            inner.phase = CapturePhase::Recording;
            inner.state.recording = true;
            inner.state.dual_active = dual;
            inner.state.started_at = Some(Utc::now());
            dual
        };

        tracing::info!("Recording started (dual camera: {})", dual);
        self.emit(CaptureEvent::Started { dual });
        Ok(true)
    }

    async fn start_back(
        &self,
        cycle: u64,
        devices: &dyn MediaDevices,
        recorder: &dyn RecorderBackend,
    ) -> CaptureResult<bool> {
        let stream = acquire_stream(devices, SessionRole::Back, &self.shared.config.back).await?;
        if !self.is_current(cycle) {
            tracing::info!("Back stream granted after stop; releasing it");
            stop_all_tracks(stream.as_ref());
            return Ok(false);
        }

        let session = self.start_session(cycle, SessionRole::Back, stream, recorder)?;
        Ok(self.install(cycle, session))
    }

    fn start_session(
        &self,
        cycle: u64,
        role: SessionRole,
        stream: StreamHandle,
        recorder: &dyn RecorderBackend,
    ) -> CaptureResult<RecorderSession> {
        let config = &self.shared.config;
        let mime_type = negotiate_mime_type(
            Some(recorder),
            &config.mime_preference,
            &config.default_mime_type,
        );

        let mut session = RecorderSession::new(
            role,
            stream,
            &mime_type,
            self.shared.artifacts.clone(),
            self.failure_hook(cycle),
        );
        if let Err(e) = session.start(recorder, config.timeslice()) {
            tracing::error!("Failed to start {} recorder: {}", role, e);
            session.abort();
            return Err(e);
        }
        Ok(session)
    }

    /// Hand a started session to the controller, unless a stop got there first
    fn install(&self, cycle: u64, mut session: RecorderSession) -> bool {
        let role = session.role();
        let mut inner = self.shared.inner.lock();
        if inner.cycle != cycle {
            drop(inner);
            tracing::info!("{} session started after stop; aborting it", role);
            session.abort();
            return false;
        }

        inner.state.set_mime_type(role, session.mime_type());
        if let Some(stream) = session.stream() {
            self.shared.previews.bind(role, stream);
        }
        match role {
            SessionRole::Front => inner.front = Some(session),
            SessionRole::Back => inner.back = Some(session),
        }
        true
    }

    fn degrade(&self, cycle: u64, error: CaptureError) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.cycle != cycle {
                return;
            }
            inner.state.dual_active = false;
            inner.state.supports_dual_camera = Some(false);
        }
        self.shared.previews.clear(SessionRole::Back);

        let reason = error.to_string();
        tracing::warn!("Back camera unavailable, continuing with front only: {}", reason);
        self.emit(CaptureEvent::Degraded { reason });
    }

    fn rollback(&self, cycle: u64, error: CaptureError) {
        let message = error.to_string();
        let sessions = {
            let mut inner = self.shared.inner.lock();
            if inner.cycle != cycle {
                return;
            }
            inner.phase = CapturePhase::Idle;
            inner.state.recording = false;
            inner.state.dual_active = false;
            inner.state.error = Some(message.clone());
            inner.take_sessions()
        };

        for mut session in sessions {
            session.abort();
        }
        self.shared.previews.clear_all();

        tracing::error!("Failed to start recording: {}", message);
        self.emit(CaptureEvent::Error { message });
    }

    fn failure_hook(&self, cycle: u64) -> FailureHook {
        let shared = Arc::downgrade(&self.shared);
        Arc::new(move |role, message| {
            if let Some(shared) = shared.upgrade() {
                DualCaptureController { shared }.handle_session_failure(cycle, role, message);
            }
        })
    }

    fn handle_session_failure(&self, cycle: u64, role: SessionRole, message: String) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.cycle != cycle {
                tracing::debug!("Ignoring {} failure from a finished cycle", role);
                return;
            }
            inner.state.error = Some(CaptureError::RecordingFailure(message.clone()).to_string());
            match role {
                SessionRole::Front => inner.phase = CapturePhase::Failed,
                SessionRole::Back => inner.state.dual_active = false,
            }
        }

        self.emit(CaptureEvent::Error {
            message: message.clone(),
        });

        match role {
            SessionRole::Front => {
                tracing::error!("Front recording failed, tearing down: {}", message);
                let controller = self.clone();
                tokio::spawn(async move {
                    controller.stop_recording().await;
                });
            }
            SessionRole::Back => {
                tracing::warn!("Back recording failed, continuing with front only: {}", message);
                self.shared.previews.clear(SessionRole::Back);
                self.emit(CaptureEvent::Degraded { reason: message });
            }
        }
    }

    /// Stop both sessions and release every stream. Never fails.
    pub async fn stop_recording(&self) {
        let pending = {
            let mut inner = self.shared.inner.lock();
            match inner.phase {
                CapturePhase::Idle => return,
                // Subscribed under the lock so the in-flight stop cannot finish unseen
                CapturePhase::Stopping => Err(self.shared.stopping.subscribe()),
                _ => {
                    inner.cycle += 1;
                    let sessions = inner.take_sessions();
                    if sessions.is_empty() {
                        inner.phase = CapturePhase::Idle;
                    } else {
                        inner.phase = CapturePhase::Stopping;
                        self.shared.stopping.send_replace(true);
                    }
                    inner.state.recording = false;
                    inner.state.dual_active = false;
                    Ok((inner.cycle, sessions))
                }
            }
        };

        let (cycle, mut sessions) = match pending {
            Ok(work) => work,
            Err(mut in_flight) => {
                tracing::debug!("Stop already in progress; waiting for it to finish");
                let _ = in_flight.wait_for(|stopping| !*stopping).await;
                return;
            }
        };
        let _settle = StopGuard {
            shared: &self.shared,
        };

        self.shared.previews.clear_all();
        tracing::info!("Stopping recording ({} session(s))", sessions.len());

        for session in sessions.iter_mut() {
            session.stop();
            session.release();
        }

        let timeout = self.shared.config.finalize_timeout();
        let mut finished = Vec::new();
        for session in sessions {
            let role = session.role();
            if let Some(artifact) = session.finish(timeout).await {
                finished.push((role, artifact));
            }
        }

        {
            let mut inner = self.shared.inner.lock();
            if inner.cycle != cycle {
                drop(inner);
                for (_, artifact) in finished {
                    self.shared.artifacts.revoke(&artifact.url);
                }
                return;
            }
            for (role, artifact) in &finished {
                if let Some(previous) = inner.state.artifact_mut(*role).replace(artifact.clone()) {
                    self.shared.artifacts.revoke(&previous.url);
                }
            }
            inner.phase = CapturePhase::Idle;
        }

        for (role, artifact) in finished {
            tracing::info!("{} recording ready: {} bytes", role, artifact.size_bytes);
            self.emit(CaptureEvent::ArtifactReady {
                role,
                url: artifact.url,
            });
        }
        self.emit(CaptureEvent::Stopped);
    }

    /// Revoke both artifact URLs. Safe to call at any time.
    pub fn clear_recordings(&self) {
        let artifacts = {
            let mut inner = self.shared.inner.lock();
            if !inner.state.recording {
                inner.state.started_at = None;
            }
            [inner.state.front_artifact.take(), inner.state.back_artifact.take()]
        };

        for artifact in artifacts.into_iter().flatten() {
            self.shared.artifacts.revoke(&artifact.url);
        }
    }

    /// Stop, clear and unsubscribe from permission changes
    pub async fn shutdown(&self) {
        self.stop_recording().await;
        self.clear_recordings();
        self.shared.permissions.teardown();
        tracing::info!("Capture controller shut down");
    }

    fn is_current(&self, cycle: u64) -> bool {
        self.shared.inner.lock().cycle == cycle
    }

    fn emit(&self, event: CaptureEvent) {
        // No subscribers is fine
        let _ = self.shared.events.send(event);
    }
}

fn check_permissions(permissions: &Permissions) -> CaptureResult<()> {
    let camera_denied = permissions.camera == Some(PermissionState::Denied);
    let microphone_denied = permissions.microphone == Some(PermissionState::Denied);

    match (camera_denied, microphone_denied) {
        (true, true) => Err(CaptureError::PermissionDenied(PermissionKind::CameraAndMicrophone)),
        (true, false) => Err(CaptureError::PermissionDenied(PermissionKind::Camera)),
        (false, true) => Err(CaptureError::PermissionDenied(PermissionKind::Microphone)),
        (false, false) => Ok(()),
    }
}
