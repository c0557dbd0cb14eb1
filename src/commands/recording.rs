//! Recording-related Tauri commands

use crate::capture::Permissions;
use crate::recorder::{CaptureSnapshot, DualCaptureController};
use tauri::ipc::Response;
use tauri::State;

/// Plugin state for recording
pub struct CaptureState {
    pub controller: DualCaptureController,
}

/// Start an emergency recording. Resolves to whether the front camera is
/// recording; the snapshot carries the reason when it is not.
#[tauri::command]
pub async fn start_recording(state: State<'_, CaptureState>) -> Result<bool, String> {
    Ok(state.controller.start_recording().await)
}

/// Stop recording and finalize both artifacts
#[tauri::command]
pub async fn stop_recording(state: State<'_, CaptureState>) -> Result<CaptureSnapshot, String> {
    state.controller.stop_recording().await;
    Ok(state.controller.snapshot())
}

#[tauri::command]
pub async fn clear_recordings(state: State<'_, CaptureState>) -> Result<(), String> {
    state.controller.clear_recordings();
    Ok(())
}

#[tauri::command]
pub async fn refresh_permissions(state: State<'_, CaptureState>) -> Result<Permissions, String> {
    Ok(state.controller.refresh_permissions().await)
}

#[tauri::command]
pub async fn get_recording_snapshot(
    state: State<'_, CaptureState>,
) -> Result<CaptureSnapshot, String> {
    Ok(state.controller.snapshot())
}

/// Raw bytes of a finished recording
#[tauri::command]
pub async fn get_artifact(state: State<'_, CaptureState>, url: String) -> Result<Response, String> {
    let (data, mime_type) = state
        .controller
        .artifacts()
        .resolve(&url)
        .ok_or_else(|| format!("Recording {url} is no longer available"))?;

    tracing::debug!("Serving {} ({} bytes, {})", url, data.len(), mime_type);
    Ok(Response::new(data.to_vec()))
}
