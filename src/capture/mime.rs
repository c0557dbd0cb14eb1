//! Recording codec negotiation
//!
//! Picks the first container/codec combination the recorder supports and
//! derives download names for finished artifacts.

use super::traits::RecorderBackend;
use chrono::{DateTime, SecondsFormat, Utc};

/// Safe fallback when no preference can be confirmed
pub const DEFAULT_MIME_TYPE: &str = "video/webm";

/// Codec preference, most preferred first
pub const MIME_TYPE_PREFERENCE: [&str; 4] = [
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm",
    "video/mp4",
];

/// Return the first supported entry of `preference`.
///
/// Falls back to `fallback` when there is no recorder, the recorder cannot
/// answer support queries, or nothing in the list is accepted. A probe that
/// errors counts as "not supported" for that entry only.
pub fn negotiate_mime_type<S: AsRef<str>>(
    recorder: Option<&dyn RecorderBackend>,
    preference: &[S],
    fallback: &str,
) -> String {
    let Some(recorder) = recorder else {
        return fallback.to_string();
    };
    if !recorder.has_type_probe() {
        return fallback.to_string();
    }

    preference
        .iter()
        .map(AsRef::as_ref)
        .find(|mime| match recorder.is_type_supported(mime) {
            Ok(supported) => supported,
            Err(e) => {
                tracing::debug!("MIME probe for {} failed: {}", mime, e);
                false
            }
        })
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

/// File extension for a recording MIME type
pub fn recording_file_extension(mime_type: &str) -> &'static str {
    if mime_type.contains("mp4") {
        "mp4"
    } else {
        "webm"
    }
}

/// Download filename, e.g. `emergency-front-2024-05-01T10-20-30-123Z.webm`
pub fn recording_filename(label: &str, started_at: DateTime<Utc>, mime_type: &str) -> String {
    let timestamp = started_at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!(
        "emergency-{}-{}.{}",
        label,
        timestamp,
        recording_file_extension(mime_type)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::fake::FakeRecorderBackend;
    use crate::utils::error::CaptureError;
    use chrono::TimeZone;

    #[test]
    fn test_no_recorder_falls_back() {
        let mime = negotiate_mime_type(None, &MIME_TYPE_PREFERENCE, DEFAULT_MIME_TYPE);
        assert_eq!(mime, "video/webm");
    }

    #[test]
    fn test_picks_first_vp9_entry() {
        let backend = FakeRecorderBackend::with_probe(|mime| Ok(mime.contains("vp9")));
        let mime = negotiate_mime_type(Some(&backend), &MIME_TYPE_PREFERENCE, DEFAULT_MIME_TYPE);
        assert_eq!(mime, "video/webm;codecs=vp9,opus");
    }

    #[test]
    fn test_probe_errors_count_as_unsupported() {
        let backend = FakeRecorderBackend::with_probe(|mime| {
            if mime.contains("vp9") {
                Err(CaptureError::RecordingFailure("probe exploded".to_string()))
            } else {
                Ok(mime.contains("vp8"))
            }
        });
        let mime = negotiate_mime_type(Some(&backend), &MIME_TYPE_PREFERENCE, DEFAULT_MIME_TYPE);
        assert_eq!(mime, "video/webm;codecs=vp8,opus");
    }

    #[test]
    fn test_missing_probe_falls_back() {
        let backend = FakeRecorderBackend::without_probe();
        let mime = negotiate_mime_type(Some(&backend), &["video/mp4"], DEFAULT_MIME_TYPE);
        assert_eq!(mime, DEFAULT_MIME_TYPE);
    }

    #[test]
    fn test_nothing_supported_falls_back() {
        let backend = FakeRecorderBackend::with_probe(|_| Ok(false));
        let mime = negotiate_mime_type(Some(&backend), &MIME_TYPE_PREFERENCE, "video/mp4");
        assert_eq!(mime, "video/mp4");
    }

    #[test]
    fn test_recording_filename() {
        let started = Utc.with_ymd_and_hms(2024, 5, 1, 10, 20, 30).unwrap();
        assert_eq!(
            recording_filename("front", started, "video/webm;codecs=vp9,opus"),
            "emergency-front-2024-05-01T10-20-30-000Z.webm"
        );
        assert_eq!(recording_file_extension("video/mp4"), "mp4");
    }
}
