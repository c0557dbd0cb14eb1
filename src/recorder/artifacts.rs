//! Revocable artifact URLs
//!
//! Finished recordings are held in memory and addressed by opaque
//! `blob:` URLs until revoked.

use super::state::CaptureArtifact;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

const URL_PREFIX: &str = "blob:emergency-capture/";

struct StoredArtifact {
    mime_type: String,
    data: Arc<[u8]>,
}

/// In-memory registry of live artifacts
#[derive(Clone, Default)]
pub struct ArtifactStore {
    blobs: Arc<RwLock<HashMap<String, StoredArtifact>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate `chunks` into one artifact and issue a URL for it
    pub fn create(&self, chunks: Vec<Vec<u8>>, mime_type: &str) -> CaptureArtifact {
        let data: Vec<u8> = chunks.concat();
        let size_bytes = data.len();
        let url = format!("{URL_PREFIX}{}", Uuid::new_v4());

        self.blobs.write().insert(
            url.clone(),
            StoredArtifact {
                mime_type: mime_type.to_string(),
                data: data.into(),
            },
        );

        tracing::debug!("Issued artifact {} ({} bytes, {})", url, size_bytes, mime_type);
        CaptureArtifact {
            url,
            mime_type: mime_type.to_string(),
            size_bytes,
        }
    }

    /// Release the data behind `url`. Returns false if it was not live.
    pub fn revoke(&self, url: &str) -> bool {
        let revoked = self.blobs.write().remove(url).is_some();
        if revoked {
            tracing::debug!("Revoked artifact {}", url);
        }
        revoked
    }

    /// Bytes and MIME type of a live artifact
    pub fn resolve(&self, url: &str) -> Option<(Arc<[u8]>, String)> {
        self.blobs
            .read()
            .get(url)
            .map(|stored| (stored.data.clone(), stored.mime_type.clone()))
    }

    pub fn is_live(&self, url: &str) -> bool {
        self.blobs.read().contains_key(url)
    }

    pub fn live_count(&self) -> usize {
        self.blobs.read().len()
    }
}
