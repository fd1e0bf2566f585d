use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;

/// Snapshot of a controller's session for shells and diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Whether the controller currently reports itself as recording
    pub is_recording: bool,

    /// Current state-machine state
    pub state: SessionState,

    /// When the last session started, if any session ever did
    pub started_at: Option<DateTime<Utc>>,

    /// Chunks buffered so far in the active session
    pub chunks_buffered: usize,

    /// Mime type negotiated for the most recent session
    pub mime_type: Option<String>,
}
