//! A single recorder session
//!
//! Owns one acquired stream and the recorder bound to it. Recorder
//! notifications arrive on a channel drained by a pump task that buffers
//! chunks and assembles the artifact on finalize.

use super::artifacts::ArtifactStore;
use super::state::{CaptureArtifact, SessionRole, SessionState};
use crate::capture::traits::{
    stop_all_tracks, MediaRecorder, RecorderBackend, RecorderEvent, StreamHandle,
};
use crate::utils::error::{CaptureError, CaptureResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Called once when the recorder reports an error
pub type FailureHook = Arc<dyn Fn(SessionRole, String) + Send + Sync>;

struct SessionCore {
    state: SessionState,
    stream: Option<StreamHandle>,
    chunks: Vec<Vec<u8>>,
    artifact: Option<CaptureArtifact>,
    error: Option<String>,
    /// Set when the session is abandoned; buffered data is dropped
    discard: bool,
}

impl SessionCore {
    /// Stop the hardware tracks. Runs at most once per stream.
    fn release_stream(&mut self, role: SessionRole) {
        if let Some(stream) = self.stream.take() {
            stop_all_tracks(stream.as_ref());
            tracing::debug!("Released {} stream {}", role, stream.id());
        }
    }

    fn assemble(&mut self, artifacts: &ArtifactStore, mime_type: &str) {
        let chunks = std::mem::take(&mut self.chunks);
        if self.discard || chunks.is_empty() {
            return;
        }
        self.artifact = Some(artifacts.create(chunks, mime_type));
    }
}

/// One camera's recording: stream, recorder and chunk buffer
pub struct RecorderSession {
    id: Uuid,
    role: SessionRole,
    mime_type: String,
    core: Arc<Mutex<SessionCore>>,
    recorder: Option<Box<dyn MediaRecorder>>,
    pump: Option<JoinHandle<()>>,
    artifacts: ArtifactStore,
    on_failure: FailureHook,
}

impl RecorderSession {
    /// Create an idle session that owns `stream`
    pub fn new(
        role: SessionRole,
        stream: StreamHandle,
        mime_type: &str,
        artifacts: ArtifactStore,
        on_failure: FailureHook,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            mime_type: mime_type.to_string(),
            core: Arc::new(Mutex::new(SessionCore {
                state: SessionState::Idle,
                stream: Some(stream),
                chunks: Vec::new(),
                artifact: None,
                error: None,
                discard: false,
            })),
            recorder: None,
            pump: None,
            artifacts,
            on_failure,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn state(&self) -> SessionState {
        self.core.lock().state
    }

    pub fn error(&self) -> Option<String> {
        self.core.lock().error.clone()
    }

    pub fn buffered_chunks(&self) -> usize {
        self.core.lock().chunks.len()
    }

    /// The stream this session owns, while it is still held
    pub fn stream(&self) -> Option<StreamHandle> {
        self.core.lock().stream.clone()
    }

    /// Create the recorder and begin buffering. Idle -> Recording.
    pub fn start(&mut self, backend: &dyn RecorderBackend, timeslice: Duration) -> CaptureResult<()> {
        let stream = {
            let core = self.core.lock();
            if core.state != SessionState::Idle {
                return Err(CaptureError::RecordingFailure(format!(
                    "{} session already started",
                    self.role
                )));
            }
            core.stream.clone().ok_or_else(|| {
                CaptureError::RecordingFailure(format!("{} stream already released", self.role))
            })?
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut recorder = backend.create(stream, &self.mime_type, events_tx)?;

        self.pump = Some(tokio::spawn(pump_events(
            self.role,
            self.mime_type.clone(),
            self.core.clone(),
            events_rx,
            self.artifacts.clone(),
            self.on_failure.clone(),
        )));

        if let Err(e) = recorder.start(timeslice) {
            if let Some(pump) = self.pump.take() {
                pump.abort();
            }
            return Err(e);
        }

        self.core.lock().state = SessionState::Recording;
        self.recorder = Some(recorder);

        tracing::info!(
            "{} session {} recording ({}, {}ms timeslice)",
            self.role,
            self.id,
            self.mime_type,
            timeslice.as_millis()
        );
        Ok(())
    }

    /// Ask the recorder to finalize. No-op unless recording.
    pub fn stop(&mut self) {
        {
            let mut core = self.core.lock();
            if core.state != SessionState::Recording {
                return;
            }
            core.state = SessionState::Stopping;
        }

        if let Some(recorder) = self.recorder.as_mut() {
            if recorder.is_active() {
                recorder.stop();
            }
        }
        tracing::info!("{} session {} stopping", self.role, self.id);
    }

    /// Stop the hardware tracks whether or not finalize has happened
    pub fn release(&mut self) {
        self.core.lock().release_stream(self.role);
    }

    /// Abandon the session: drop buffered data, release everything
    pub fn abort(&mut self) {
        {
            let mut core = self.core.lock();
            core.discard = true;
            core.chunks.clear();
        }
        if let Some(mut recorder) = self.recorder.take() {
            if recorder.is_active() {
                recorder.stop();
            }
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        let mut core = self.core.lock();
        core.release_stream(self.role);
        if !core.state.is_terminal() {
            core.state = SessionState::Stopped;
        }
        tracing::info!("{} session {} aborted", self.role, self.id);
    }

    /// Wait up to `timeout` for the finalize notification and hand back the
    /// artifact, if one was produced
    pub async fn finish(mut self, timeout: Duration) -> Option<CaptureArtifact> {
        if let Some(mut pump) = self.pump.take() {
            if tokio::time::timeout(timeout, &mut pump).await.is_err() {
                tracing::warn!(
                    "{} session {} did not finalize within {}ms; keeping buffered chunks",
                    self.role,
                    self.id,
                    timeout.as_millis()
                );
                pump.abort();
                self.core.lock().assemble(&self.artifacts, &self.mime_type);
            }
        }
        self.recorder = None;

        let mut core = self.core.lock();
        core.release_stream(self.role);
        if !core.state.is_terminal() {
            core.state = SessionState::Stopped;
        }
        core.artifact.take()
    }
}

impl Drop for RecorderSession {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        let mut core = self.core.lock();
        core.release_stream(self.role);
        // Anything still unassembled can no longer be collected
        core.chunks.clear();
        if let Some(artifact) = core.artifact.take() {
            self.artifacts.revoke(&artifact.url);
        }
    }
}

async fn pump_events(
    role: SessionRole,
    mime_type: String,
    core: Arc<Mutex<SessionCore>>,
    mut events: mpsc::UnboundedReceiver<RecorderEvent>,
    artifacts: ArtifactStore,
    on_failure: FailureHook,
) {
    while let Some(event) = events.recv().await {
        match event {
            RecorderEvent::Data(data) => {
                if data.is_empty() {
                    continue;
                }
                let mut core = core.lock();
                if !core.discard && !core.state.is_terminal() {
                    core.chunks.push(data);
                }
            }
            RecorderEvent::Stopped => break,
            RecorderEvent::Error(message) => {
                let message = message.unwrap_or_else(|| role.fallback_error().to_string());
                tracing::error!("{} recorder failed: {}", role, message);
                {
                    let mut core = core.lock();
                    core.release_stream(role);
                    core.assemble(&artifacts, &mime_type);
                    core.error = Some(message.clone());
                    core.state = SessionState::Failed;
                }
                on_failure(role, message);
                return;
            }
        }
    }

    // Finalized, or the recorder went away without saying so
    let mut core = core.lock();
    core.release_stream(role);
    core.assemble(&artifacts, &mime_type);
    if !core.state.is_terminal() {
        core.state = SessionState::Stopped;
    }
    tracing::info!(
        "{} session finalized ({})",
        role,
        if core.artifact.is_some() { "artifact ready" } else { "no data" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::fake::{wait_until, FakePlatform};
    use crate::capture::traits::{FacingMode, MediaDevices};
    use crate::capture::acquire::default_constraints;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FINALIZE: Duration = Duration::from_millis(500);

    fn no_failure() -> FailureHook {
        Arc::new(|_, _| {})
    }

    async fn session(platform: &FakePlatform, role: SessionRole, hook: FailureHook) -> RecorderSession {
        let stream = platform
            .devices
            .open_stream(&default_constraints(role))
            .await
            .unwrap();
        RecorderSession::new(role, stream, "video/webm", ArtifactStore::new(), hook)
    }

    #[tokio::test]
    async fn test_stop_assembles_buffered_chunks() {
        let platform = FakePlatform::new();
        let mut session = session(&platform, SessionRole::Front, no_failure()).await;
        session.start(platform.recorder.as_ref(), Duration::from_millis(1000)).unwrap();
        assert_eq!(session.state(), SessionState::Recording);

        let recorder = platform.recorder.recorders().remove(0);
        assert_eq!(recorder.timeslice(), Some(Duration::from_millis(1000)));
        recorder.emit_chunk(b"one-");
        recorder.emit_chunk(b"");
        recorder.emit_chunk(b"two-");
        assert!(wait_until(|| session.buffered_chunks() == 2).await);

        session.stop();
        session.release();
        let artifacts = session.artifacts.clone();
        let artifact = session.finish(FINALIZE).await.unwrap();

        let (data, _) = artifacts.resolve(&artifact.url).unwrap();
        assert_eq!(&data[..], b"one-two-tail");
        assert_eq!(artifact.mime_type, "video/webm");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let platform = FakePlatform::new();
        let mut session = session(&platform, SessionRole::Back, no_failure()).await;

        // Never started
        session.stop();
        assert_eq!(session.state(), SessionState::Idle);

        session.start(platform.recorder.as_ref(), Duration::from_millis(1000)).unwrap();
        session.stop();
        session.stop();
        let recorder = platform.recorder.recorders().remove(0);
        assert_eq!(recorder.stop_calls(), 1);
    }

    #[tokio::test]
    async fn test_release_stops_each_track_once() {
        let platform = FakePlatform::new();
        let mut session = session(&platform, SessionRole::Front, no_failure()).await;
        session.start(platform.recorder.as_ref(), Duration::from_millis(1000)).unwrap();

        session.release();
        session.release();
        session.stop();
        session.finish(FINALIZE).await;

        let stream = platform.stream_facing(FacingMode::User).unwrap();
        assert!(stream.fake_tracks().iter().all(|t| t.stop_count() == 1));
    }

    #[tokio::test]
    async fn test_recorder_error_fails_session_and_releases() {
        let platform = FakePlatform::new();
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = failures.clone();
        let hook: FailureHook = Arc::new(move |role, message| {
            assert_eq!(role, SessionRole::Back);
            assert_eq!(message, "Background camera recording failed.");
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let mut session = session(&platform, SessionRole::Back, hook).await;
        session.start(platform.recorder.as_ref(), Duration::from_millis(1000)).unwrap();
        platform.recorder.recorders()[0].emit_error(None);

        assert!(wait_until(|| session.state() == SessionState::Failed).await);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(session.error().as_deref(), Some("Background camera recording failed."));

        let stream = platform.stream_facing(FacingMode::Environment).unwrap();
        assert!(stream.fake_tracks().iter().all(|t| t.stop_count() == 1));
    }

    #[tokio::test]
    async fn test_start_failure_leaves_session_idle() {
        let platform = FakePlatform::new();
        platform.recorder.fail_start();
        let mut session = session(&platform, SessionRole::Front, no_failure()).await;

        assert!(session.start(platform.recorder.as_ref(), Duration::from_millis(1000)).is_err());
        assert_eq!(session.state(), SessionState::Idle);

        session.abort();
        let stream = platform.stream_facing(FacingMode::User).unwrap();
        assert!(stream.fake_tracks().iter().all(|t| t.stop_count() == 1));
    }

    #[tokio::test]
    async fn test_finish_salvages_chunks_when_recorder_stays_silent() {
        let platform = FakePlatform::new();
        let mut session = session(&platform, SessionRole::Front, no_failure()).await;
        session.start(platform.recorder.as_ref(), Duration::from_millis(1000)).unwrap();
        let recorder = platform.recorder.recorders().remove(0);
        recorder.never_finalize();
        recorder.emit_chunk(b"kept");
        assert!(wait_until(|| session.buffered_chunks() == 1).await);

        session.stop();
        let artifacts = session.artifacts.clone();
        let artifact = session.finish(Duration::from_millis(20)).await.unwrap();

        let (data, mime_type) = artifacts.resolve(&artifact.url).unwrap();
        assert_eq!(&data[..], b"kept");
        assert_eq!(mime_type, artifact.mime_type);
        assert_eq!(artifacts.live_count(), 1);
    }

    #[tokio::test]
    async fn test_finish_timeout_without_chunks_yields_nothing() {
        let platform = FakePlatform::new();
        let mut session = session(&platform, SessionRole::Front, no_failure()).await;
        session.start(platform.recorder.as_ref(), Duration::from_millis(1000)).unwrap();
        platform.recorder.recorders().remove(0).never_finalize();

        session.stop();
        let artifacts = session.artifacts.clone();
        assert!(session.finish(Duration::from_millis(20)).await.is_none());
        assert_eq!(artifacts.live_count(), 0);
    }
}
