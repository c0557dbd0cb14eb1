//! Scriptable in-memory platform used by the unit tests

use super::traits::{
    FacingMode, MediaDevices, MediaRecorder, MediaStream, MediaTrack, PermissionApi, PermissionName,
    PermissionState, PermissionStatus, PlatformCapabilities, RecorderBackend, RecorderEvent,
    RecorderEventSender, StreamConstraints, StreamHandle, TrackKind,
};
use crate::utils::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// Yield to the runtime until `condition` holds, giving up after a while
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    condition()
}

pub struct FakeTrack {
    kind: TrackKind,
    stops: AtomicUsize,
}

impl FakeTrack {
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl MediaTrack for FakeTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.stop_count() == 0
    }
}

pub struct FakeStream {
    id: String,
    facing_mode: FacingMode,
    tracks: Vec<Arc<FakeTrack>>,
}

impl FakeStream {
    pub fn facing_mode(&self) -> FacingMode {
        self.facing_mode
    }

    pub fn fake_tracks(&self) -> &[Arc<FakeTrack>] {
        &self.tracks
    }
}

impl MediaStream for FakeStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks
            .iter()
            .map(|t| t.clone() as Arc<dyn MediaTrack>)
            .collect()
    }
}

/// Device surface with scripted failures and an optional gate that holds
/// `open_stream` until released
pub struct FakeDevices {
    video_inputs: Mutex<CaptureResult<usize>>,
    failures: Mutex<HashMap<FacingMode, String>>,
    opened: Mutex<Vec<Arc<FakeStream>>>,
    open_calls: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeDevices {
    pub fn new(video_inputs: usize) -> Self {
        Self {
            video_inputs: Mutex::new(Ok(video_inputs)),
            failures: Mutex::new(HashMap::new()),
            opened: Mutex::new(Vec::new()),
            open_calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    pub fn fail_facing(&self, facing: FacingMode, reason: &str) {
        self.failures.lock().insert(facing, reason.to_string());
    }

    pub fn fail_enumeration(&self, reason: &str) {
        *self.video_inputs.lock() = Err(CaptureError::AcquisitionFailure(reason.to_string()));
    }

    /// Hold every subsequent `open_stream` until the returned notify fires
    pub fn hold_open(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock() = Some(notify.clone());
        notify
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> Vec<Arc<FakeStream>> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn open_stream(&self, constraints: &StreamConstraints) -> CaptureResult<StreamHandle> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(reason) = self.failures.lock().get(&constraints.facing_mode) {
            return Err(CaptureError::AcquisitionFailure(reason.clone()));
        }

        let mut tracks = vec![Arc::new(FakeTrack {
            kind: TrackKind::Video,
            stops: AtomicUsize::new(0),
        })];
        if constraints.audio.is_some() {
            tracks.push(Arc::new(FakeTrack {
                kind: TrackKind::Audio,
                stops: AtomicUsize::new(0),
            }));
        }

        let stream = Arc::new(FakeStream {
            id: format!("fake-stream-{}", self.open_calls()),
            facing_mode: constraints.facing_mode,
            tracks,
        });
        self.opened.lock().push(stream.clone());
        Ok(stream)
    }

    async fn count_video_inputs(&self) -> CaptureResult<usize> {
        match &*self.video_inputs.lock() {
            Ok(count) => Ok(*count),
            Err(e) => Err(CaptureError::AcquisitionFailure(e.to_string())),
        }
    }
}

/// Shared view of a recorder created by `FakeRecorderBackend`
pub struct FakeRecorderHandle {
    pub stream_id: String,
    pub mime_type: String,
    events: RecorderEventSender,
    active: AtomicBool,
    timeslice: Mutex<Option<Duration>>,
    stop_calls: AtomicUsize,
    silent_stop: AtomicBool,
}

impl FakeRecorderHandle {
    pub fn emit_chunk(&self, data: &[u8]) {
        let _ = self.events.send(RecorderEvent::Data(data.to_vec()));
    }

    pub fn emit_error(&self, message: Option<&str>) {
        self.active.store(false, Ordering::SeqCst);
        let _ = self.events.send(RecorderEvent::Error(message.map(str::to_string)));
    }

    /// Make `stop` never deliver the finalize notification
    pub fn never_finalize(&self) {
        self.silent_stop.store(true, Ordering::SeqCst);
    }

    pub fn timeslice(&self) -> Option<Duration> {
        *self.timeslice.lock()
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

struct FakeRecorder {
    handle: Arc<FakeRecorderHandle>,
    fail_start: bool,
}

impl MediaRecorder for FakeRecorder {
    fn start(&mut self, timeslice: Duration) -> CaptureResult<()> {
        if self.fail_start {
            return Err(CaptureError::RecordingFailure(
                "NotSupportedError: recorder refused to start".to_string(),
            ));
        }
        *self.handle.timeslice.lock() = Some(timeslice);
        self.handle.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.handle.stop_calls.fetch_add(1, Ordering::SeqCst);
        if !self.handle.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.handle.silent_stop.load(Ordering::SeqCst) {
            return;
        }
        // Real recorders flush what they hold before announcing the stop
        self.handle.emit_chunk(b"tail");
        let _ = self.handle.events.send(RecorderEvent::Stopped);
    }

    fn is_active(&self) -> bool {
        self.handle.active.load(Ordering::SeqCst)
    }
}

type ProbeFn = Box<dyn Fn(&str) -> CaptureResult<bool> + Send + Sync>;

pub struct FakeRecorderBackend {
    probe: Option<ProbeFn>,
    created: Mutex<Vec<Arc<FakeRecorderHandle>>>,
    fail_start: AtomicBool,
}

impl FakeRecorderBackend {
    pub fn new() -> Self {
        Self::with_probe(|_| Ok(true))
    }

    pub fn with_probe(probe: impl Fn(&str) -> CaptureResult<bool> + Send + Sync + 'static) -> Self {
        Self {
            probe: Some(Box::new(probe)),
            created: Mutex::new(Vec::new()),
            fail_start: AtomicBool::new(false),
        }
    }

    pub fn without_probe() -> Self {
        Self {
            probe: None,
            created: Mutex::new(Vec::new()),
            fail_start: AtomicBool::new(false),
        }
    }

    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn recorders(&self) -> Vec<Arc<FakeRecorderHandle>> {
        self.created.lock().clone()
    }

    pub fn recorder_for(&self, stream_id: &str) -> Option<Arc<FakeRecorderHandle>> {
        self.created
            .lock()
            .iter()
            .find(|r| r.stream_id == stream_id)
            .cloned()
    }
}

impl RecorderBackend for FakeRecorderBackend {
    fn has_type_probe(&self) -> bool {
        self.probe.is_some()
    }

    fn is_type_supported(&self, mime_type: &str) -> CaptureResult<bool> {
        match &self.probe {
            Some(probe) => probe(mime_type),
            None => Err(CaptureError::UnsupportedEnvironment("no type probe".to_string())),
        }
    }

    fn create(
        &self,
        stream: StreamHandle,
        mime_type: &str,
        events: RecorderEventSender,
    ) -> CaptureResult<Box<dyn MediaRecorder>> {
        let handle = Arc::new(FakeRecorderHandle {
            stream_id: stream.id().to_string(),
            mime_type: mime_type.to_string(),
            events,
            active: AtomicBool::new(false),
            timeslice: Mutex::new(None),
            stop_calls: AtomicUsize::new(0),
            silent_stop: AtomicBool::new(false),
        });
        self.created.lock().push(handle.clone());
        Ok(Box::new(FakeRecorder {
            handle,
            fail_start: self.fail_start.load(Ordering::SeqCst),
        }))
    }
}

/// Permission surface whose states can be changed from the test
pub struct FakePermissions {
    senders: HashMap<PermissionName, watch::Sender<PermissionState>>,
    failing: Mutex<HashSet<PermissionName>>,
}

impl FakePermissions {
    pub fn new(camera: PermissionState, microphone: PermissionState) -> Self {
        let mut senders = HashMap::new();
        senders.insert(PermissionName::Camera, watch::channel(camera).0);
        senders.insert(PermissionName::Microphone, watch::channel(microphone).0);
        Self {
            senders,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn set(&self, name: PermissionName, state: PermissionState) {
        if let Some(sender) = self.senders.get(&name) {
            sender.send_replace(state);
        }
    }

    pub fn fail_query(&self, name: PermissionName) {
        self.failing.lock().insert(name);
    }
}

#[async_trait]
impl PermissionApi for FakePermissions {
    async fn query(&self, name: PermissionName) -> CaptureResult<PermissionStatus> {
        if self.failing.lock().contains(&name) {
            return Err(CaptureError::UnsupportedEnvironment(format!(
                "{name:?} is not a queryable permission"
            )));
        }
        let sender = self
            .senders
            .get(&name)
            .ok_or_else(|| CaptureError::UnsupportedEnvironment(format!("{name:?} unknown")))?;
        Ok(PermissionStatus {
            state: *sender.borrow(),
            changes: sender.subscribe(),
        })
    }
}

/// The three fake surfaces bundled together
pub struct FakePlatform {
    pub devices: Arc<FakeDevices>,
    pub recorder: Arc<FakeRecorderBackend>,
    pub permissions: Arc<FakePermissions>,
}

impl FakePlatform {
    /// Two cameras, everything granted
    pub fn new() -> Self {
        Self::with_cameras(2)
    }

    pub fn with_cameras(video_inputs: usize) -> Self {
        Self {
            devices: Arc::new(FakeDevices::new(video_inputs)),
            recorder: Arc::new(FakeRecorderBackend::new()),
            permissions: Arc::new(FakePermissions::new(
                PermissionState::Granted,
                PermissionState::Granted,
            )),
        }
    }

    pub fn capabilities(&self) -> PlatformCapabilities {
        PlatformCapabilities {
            devices: Some(self.devices.clone()),
            recorder: Some(self.recorder.clone()),
            permissions: Some(self.permissions.clone()),
        }
    }

    pub fn stream_facing(&self, facing: FacingMode) -> Option<Arc<FakeStream>> {
        self.devices
            .opened()
            .into_iter()
            .find(|s| s.facing_mode() == facing)
    }
}
