use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::warn;
use uuid::Uuid;

/// Revocable handle over a finished clip's bytes, usable for local playback
///
/// The registry holds the bytes until the handle is released; a caller that
/// forgets to release leaks the buffer. Releasing a handle that was never
/// created (or releasing twice) is a caller error, not a supported
/// operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewUrl(String);

impl PreviewUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PreviewUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct PreviewEntry {
    data: Arc<Vec<u8>>,
    mime_type: String,
}

/// In-memory registry backing preview handles
#[derive(Default)]
pub(crate) struct PreviewRegistry {
    entries: Mutex<HashMap<Uuid, PreviewEntry>>,
}

impl PreviewRegistry {
    pub(crate) fn create(&self, data: &[u8], mime_type: &str) -> PreviewUrl {
        let id = Uuid::new_v4();
        self.entries.lock().unwrap().insert(
            id,
            PreviewEntry {
                data: Arc::new(data.to_vec()),
                mime_type: mime_type.to_string(),
            },
        );
        PreviewUrl(format!("mem://{}", id))
    }

    /// Bytes and mime type behind a handle, if it is still live
    pub(crate) fn resolve(&self, url: &PreviewUrl) -> Option<(Arc<Vec<u8>>, String)> {
        let id = parse_id(url)?;
        let entries = self.entries.lock().unwrap();
        entries
            .get(&id)
            .map(|e| (Arc::clone(&e.data), e.mime_type.clone()))
    }

    pub(crate) fn release(&self, url: &PreviewUrl) {
        let Some(id) = parse_id(url) else {
            warn!(url = %url, "release of malformed preview url");
            return;
        };
        if self.entries.lock().unwrap().remove(&id).is_none() {
            warn!(url = %url, "release of unknown preview url");
        }
    }
}

fn parse_id(url: &PreviewUrl) -> Option<Uuid> {
    url.0
        .strip_prefix("mem://")
        .and_then(|raw| Uuid::parse_str(raw).ok())
}
