//! Recording system module
//!
//! - RecorderSession owns one camera's stream and recorder
//! - DualCaptureController runs the front and back sessions together
//! - ArtifactStore holds finished recordings behind revocable URLs

pub mod artifacts;
pub mod coordinator;
pub mod preview;
pub mod session;
pub mod state;

pub use artifacts::ArtifactStore;
pub use coordinator::DualCaptureController;
pub use preview::PreviewStream;
pub use session::RecorderSession;
pub use state::{CaptureArtifact, CaptureEvent, CapturePhase, CaptureSnapshot, SessionRole, SessionState};
