//! Emergency Capture - dual-camera emergency recording.
//!
//! Records the front camera with the microphone and, where the device has
//! one, the back camera alongside it. The back camera is best-effort: losing
//! it never stops the front recording.

pub mod capture;
#[cfg(feature = "tauri")]
pub mod commands;
pub mod recorder;
pub mod utils;

pub use recorder::DualCaptureController;
pub use utils::{CaptureError, CaptureResult, RecorderConfig};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the default tracing subscriber. `RUST_LOG` overrides the filter.
/// Does nothing if a subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "emergency_capture=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Event name controller events are forwarded under
#[cfg(feature = "tauri")]
pub const EVENT_NAME: &str = "emergency-capture://event";

/// Tauri plugin exposing the controller to the frontend
#[cfg(feature = "tauri")]
pub fn init<R: tauri::Runtime>(
    controller: DualCaptureController,
) -> tauri::plugin::TauriPlugin<R> {
    use commands::recording::CaptureState;
    use tauri::{Emitter, Manager};
    use tokio::sync::broadcast::error::RecvError;

    tauri::plugin::Builder::new("emergency-capture")
        .invoke_handler(tauri::generate_handler![
            commands::recording::start_recording,
            commands::recording::stop_recording,
            commands::recording::clear_recordings,
            commands::recording::refresh_permissions,
            commands::recording::get_recording_snapshot,
            commands::recording::get_artifact,
        ])
        .setup(move |app, _api| {
            tracing::info!("Starting Emergency Capture v{}", env!("CARGO_PKG_VERSION"));

            let mut events = controller.subscribe();
            let handle = app.clone();
            tauri::async_runtime::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => {
                            if let Err(e) = handle.emit(EVENT_NAME, &event) {
                                tracing::warn!("Failed to forward capture event: {}", e);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!("Dropped {} capture events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            });

            let refresh = controller.clone();
            tauri::async_runtime::spawn(async move {
                refresh.refresh_permissions().await;
            });

            app.manage(CaptureState { controller });
            Ok(())
        })
        .build()
}
