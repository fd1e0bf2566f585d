use serde::{Deserialize, Serialize};

/// State machine of a capture session
///
/// Success path is `Idle → Starting → Recording → Stopping → Idle`; failures
/// in any non-idle state run cleanup and land back in `Idle`. Once capture
/// has begun, `Stopping` is always entered before `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session in flight
    Idle,
    /// Acquiring the stream and opening the encoder
    Starting,
    /// Actively capturing and buffering chunks
    Recording,
    /// Finalizing: flush requested, grace window, concat, duration repair
    Stopping,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}
