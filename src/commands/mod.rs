//! Tauri command handlers
//!
//! IPC commands the frontend calls through the plugin's invoke handler.

pub mod recording;
