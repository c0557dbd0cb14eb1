//! Runtime capability check

use super::traits::PlatformCapabilities;
use serde::{Deserialize, Serialize};

const NO_DEVICE_API: &str =
    "This runtime does not expose camera and microphone controls required for recording.";
const NO_RECORDER_API: &str =
    "This runtime has no media recorder available. Use the mobile apps instead.";

/// Whether recording can work at all on this runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportState {
    pub supported: bool,
    pub reason: Option<String>,
}

impl SupportState {
    /// Probe the capability set. The device surface is checked before the
    /// recorder so the reason names the first missing piece.
    pub fn probe(capabilities: &PlatformCapabilities) -> Self {
        if capabilities.devices.is_none() {
            return Self::unsupported(NO_DEVICE_API);
        }
        if capabilities.recorder.is_none() {
            return Self::unsupported(NO_RECORDER_API);
        }
        Self {
            supported: true,
            reason: None,
        }
    }

    fn unsupported(reason: &str) -> Self {
        Self {
            supported: false,
            reason: Some(reason.to_string()),
        }
    }
}
