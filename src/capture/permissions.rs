//! Camera and microphone permission tracking
//!
//! Queries the platform's permission surface and keeps a live snapshot that
//! follows change notifications until teardown.

use super::traits::{PermissionApi, PermissionName, PermissionState};
use crate::recorder::state::CaptureEvent;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Camera and microphone authorization. `None` means the platform could not report it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub camera: Option<PermissionState>,
    pub microphone: Option<PermissionState>,
}

impl Permissions {
    pub fn get(&self, name: PermissionName) -> Option<PermissionState> {
        match name {
            PermissionName::Camera => self.camera,
            PermissionName::Microphone => self.microphone,
        }
    }

    fn set(&mut self, name: PermissionName, state: Option<PermissionState>) {
        match name {
            PermissionName::Camera => self.camera = state,
            PermissionName::Microphone => self.microphone = state,
        }
    }
}

/// Live permission snapshot with change subscriptions
pub struct PermissionMonitor {
    api: Option<Arc<dyn PermissionApi>>,
    snapshot: Arc<RwLock<Permissions>>,
    supported: bool,
    watchers: Mutex<HashMap<PermissionName, JoinHandle<()>>>,
    events: broadcast::Sender<CaptureEvent>,
}

impl PermissionMonitor {
    pub fn new(api: Option<Arc<dyn PermissionApi>>, events: broadcast::Sender<CaptureEvent>) -> Self {
        Self {
            supported: api.is_some(),
            api,
            snapshot: Arc::new(RwLock::new(Permissions::default())),
            watchers: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Whether the platform can report permission state
    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// Current snapshot, including changes pushed since the last refresh
    pub fn current(&self) -> Permissions {
        *self.snapshot.read()
    }

    /// Query camera and microphone state and (re)subscribe to changes
    pub async fn refresh(&self) -> Permissions {
        let Some(api) = self.api.clone() else {
            *self.snapshot.write() = Permissions::default();
            return Permissions::default();
        };

        let (camera, microphone) = tokio::join!(
            self.query_one(api.as_ref(), PermissionName::Camera),
            self.query_one(api.as_ref(), PermissionName::Microphone),
        );

        let permissions = Permissions { camera, microphone };
        *self.snapshot.write() = permissions;
        tracing::debug!("Permissions refreshed: {:?}", permissions);
        permissions
    }

    async fn query_one(&self, api: &dyn PermissionApi, name: PermissionName) -> Option<PermissionState> {
        match api.query(name).await {
            Ok(status) => {
                self.watch(name, status.changes);
                Some(status.state)
            }
            Err(e) => {
                tracing::debug!("Permission query for {:?} failed: {}", name, e);
                if let Some(previous) = self.watchers.lock().remove(&name) {
                    previous.abort();
                }
                None
            }
        }
    }

    fn watch(&self, name: PermissionName, mut changes: tokio::sync::watch::Receiver<PermissionState>) {
        let snapshot = self.snapshot.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let state = *changes.borrow_and_update();
                snapshot.write().set(name, Some(state));
                tracing::info!("Permission {:?} changed to {:?}", name, state);
                let _ = events.send(CaptureEvent::PermissionChanged { name, state });
            }
        });

        if let Some(previous) = self.watchers.lock().insert(name, handle) {
            previous.abort();
        }
    }

    /// Unregister every change subscription
    pub fn teardown(&self) {
        for (_, handle) in self.watchers.lock().drain() {
            handle.abort();
        }
    }
}

impl Drop for PermissionMonitor {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::fake::{wait_until, FakePermissions};

    fn monitor(api: Option<Arc<dyn PermissionApi>>) -> PermissionMonitor {
        let (events, _) = broadcast::channel(16);
        PermissionMonitor::new(api, events)
    }

    #[tokio::test]
    async fn test_refresh_without_permission_surface() {
        let monitor = monitor(None);
        assert!(!monitor.is_supported());
        let permissions = monitor.refresh().await;
        assert!(!monitor.is_supported());
        assert_eq!(permissions, Permissions::default());
    }

    #[tokio::test]
    async fn test_refresh_reports_states() {
        let api = Arc::new(FakePermissions::new(PermissionState::Granted, PermissionState::Prompt));
        let monitor = monitor(Some(api));
        assert!(monitor.is_supported());

        let permissions = monitor.refresh().await;
        assert!(monitor.is_supported());
        assert_eq!(permissions.camera, Some(PermissionState::Granted));
        assert_eq!(permissions.microphone, Some(PermissionState::Prompt));
    }

    #[tokio::test]
    async fn test_failed_query_is_unknown() {
        let api = Arc::new(FakePermissions::new(PermissionState::Granted, PermissionState::Granted));
        api.fail_query(PermissionName::Microphone);
        let monitor = monitor(Some(api));

        let permissions = monitor.refresh().await;
        assert_eq!(permissions.camera, Some(PermissionState::Granted));
        assert_eq!(permissions.microphone, None);
    }

    #[tokio::test]
    async fn test_changes_update_snapshot_without_refresh() {
        let api = Arc::new(FakePermissions::new(PermissionState::Granted, PermissionState::Granted));
        let monitor = monitor(Some(api.clone()));
        monitor.refresh().await;

        api.set(PermissionName::Camera, PermissionState::Denied);
        let updated = wait_until(|| monitor.current().camera == Some(PermissionState::Denied)).await;
        assert!(updated);
    }

    #[tokio::test]
    async fn test_teardown_stops_following_changes() {
        let api = Arc::new(FakePermissions::new(PermissionState::Granted, PermissionState::Granted));
        let monitor = monitor(Some(api.clone()));
        monitor.refresh().await;
        monitor.teardown();

        api.set(PermissionName::Microphone, PermissionState::Denied);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(monitor.current().microphone, Some(PermissionState::Granted));
    }
}
