//! Desktop capture backend
//!
//! Cameras through nokhwa, the microphone through cpal and encoding through
//! an ffmpeg child process. Desktop hosts have no permission query surface,
//! so permissions are reported as unsupported.

pub mod devices;
pub mod recorder;

pub use devices::{CameraTrack, MicrophoneTrack, NativeDevices, NativeStream};
pub use recorder::FfmpegRecorderBackend;

use super::traits::PlatformCapabilities;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Streams opened by `NativeDevices`, so the recorder can reach their
/// concrete tracks from a `StreamHandle`
#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<Mutex<HashMap<String, Weak<NativeStream>>>>,
}

impl StreamRegistry {
    pub fn insert(&self, stream: &Arc<NativeStream>) {
        let mut streams = self.streams.lock();
        streams.retain(|_, s| s.strong_count() > 0);
        streams.insert(stream.id.clone(), Arc::downgrade(stream));
    }

    pub fn get(&self, id: &str) -> Option<Arc<NativeStream>> {
        self.streams.lock().get(id).and_then(Weak::upgrade)
    }
}

/// Entry point for the desktop backend
pub struct NativePlatform;

impl NativePlatform {
    /// Build the capability set for this machine. The recorder surface is
    /// present only when an ffmpeg binary can be run.
    pub fn detect() -> PlatformCapabilities {
        let registry = StreamRegistry::default();
        let recorder = match FfmpegRecorderBackend::detect(registry.clone()) {
            Ok(backend) => Some(Arc::new(backend) as _),
            Err(e) => {
                tracing::warn!("No usable ffmpeg, recording disabled: {:#}", e);
                None
            }
        };

        PlatformCapabilities {
            devices: Some(Arc::new(NativeDevices::new(registry))),
            recorder,
            permissions: None,
        }
    }
}
