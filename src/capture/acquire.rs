//! Stream acquisition per camera role

use super::traits::{AudioConstraints, FacingMode, MediaDevices, StreamConstraints, StreamHandle};
use crate::recorder::state::SessionRole;
use crate::utils::error::{CaptureError, CaptureResult};

/// Constraints each role asks for by default: the front camera carries the
/// cleaned-up microphone, the back camera is video only.
pub fn default_constraints(role: SessionRole) -> StreamConstraints {
    match role {
        SessionRole::Front => StreamConstraints {
            facing_mode: FacingMode::User,
            audio: Some(AudioConstraints::default()),
        },
        SessionRole::Back => StreamConstraints {
            facing_mode: FacingMode::Environment,
            audio: None,
        },
    }
}

/// Open one stream for `role`. No retries; any platform refusal comes back
/// as `AcquisitionFailure` carrying the platform's reason.
pub async fn acquire_stream(
    devices: &dyn MediaDevices,
    role: SessionRole,
    constraints: &StreamConstraints,
) -> CaptureResult<StreamHandle> {
    tracing::info!("Acquiring {} stream ({:?})", role, constraints.facing_mode);

    match devices.open_stream(constraints).await {
        Ok(stream) => {
            tracing::info!(
                "Acquired {} stream {} with {} track(s)",
                role,
                stream.id(),
                stream.tracks().len()
            );
            Ok(stream)
        }
        Err(CaptureError::AcquisitionFailure(reason)) => {
            tracing::warn!("Failed to acquire {} stream: {}", role, reason);
            Err(CaptureError::AcquisitionFailure(reason))
        }
        Err(e) => {
            tracing::warn!("Failed to acquire {} stream: {}", role, e);
            Err(CaptureError::AcquisitionFailure(e.to_string()))
        }
    }
}
