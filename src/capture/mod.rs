//! Platform capture surfaces
//!
//! Support probing, permission tracking, codec negotiation and stream
//! acquisition on top of the platform traits.

pub mod acquire;
pub mod mime;
pub mod permissions;
pub mod support;
pub mod traits;

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod fake;

pub use acquire::{acquire_stream, default_constraints};
pub use mime::{negotiate_mime_type, recording_file_extension, recording_filename};
pub use permissions::{PermissionMonitor, Permissions};
pub use support::SupportState;
pub use traits::{
    FacingMode, MediaDevices, MediaRecorder, MediaStream, MediaTrack, PermissionApi,
    PermissionName, PermissionState, PlatformCapabilities, RecorderBackend, StreamConstraints,
    StreamHandle,
};
