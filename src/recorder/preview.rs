//! Preview binding slots
//!
//! The UI reads the live stream of each camera from here. It gets a
//! read-only view; stopping tracks stays with the owning session.

use super::state::SessionRole;
use crate::capture::traits::{StreamHandle, TrackKind};
use parking_lot::RwLock;

/// Read-only view of a stream bound for preview
#[derive(Clone)]
pub struct PreviewStream {
    stream: StreamHandle,
}

impl PreviewStream {
    pub fn id(&self) -> &str {
        self.stream.id()
    }

    pub fn track_kinds(&self) -> Vec<TrackKind> {
        self.stream.tracks().iter().map(|t| t.kind()).collect()
    }

    pub fn is_live(&self) -> bool {
        self.stream.tracks().iter().any(|t| t.is_live())
    }

    /// Whether the preview should be muted (it carries the microphone)
    pub fn has_audio(&self) -> bool {
        self.track_kinds().contains(&TrackKind::Audio)
    }
}

impl std::fmt::Debug for PreviewStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewStream").field("id", &self.id()).finish()
    }
}

/// One front and one back slot
#[derive(Default)]
pub struct PreviewSlots {
    front: RwLock<Option<PreviewStream>>,
    back: RwLock<Option<PreviewStream>>,
}

impl PreviewSlots {
    fn slot(&self, role: SessionRole) -> &RwLock<Option<PreviewStream>> {
        match role {
            SessionRole::Front => &self.front,
            SessionRole::Back => &self.back,
        }
    }

    pub fn bind(&self, role: SessionRole, stream: StreamHandle) {
        *self.slot(role).write() = Some(PreviewStream { stream });
    }

    pub fn clear(&self, role: SessionRole) {
        *self.slot(role).write() = None;
    }

    pub fn clear_all(&self) {
        self.clear(SessionRole::Front);
        self.clear(SessionRole::Back);
    }

    pub fn current(&self, role: SessionRole) -> Option<PreviewStream> {
        self.slot(role).read().clone()
    }
}
