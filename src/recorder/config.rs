use serde::{Deserialize, Serialize};

/// Configuration for a capture session, fixed at controller construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Preferred container/codec hint. The actual format is always
    /// negotiated from the fixed preference list; an unsupported hint does
    /// not error here, only at `start`.
    pub mime_type_hint: String,

    /// Target video bitrate
    pub video_bits_per_second: u32,

    /// Target audio bitrate
    pub audio_bits_per_second: u32,

    /// Whether to request audio alongside video
    pub include_audio: bool,

    /// Chunk emission interval handed to the encoder
    pub timeslice_ms: u64,

    /// How long to wait after the final flush request for in-flight chunks
    /// before concatenating. Chunks arriving later are dropped.
    pub grace_period_ms: u64,

    /// Whether to rewrite the container's duration header after stop.
    /// Streamed WebM typically omits a correct global duration, so this is
    /// on by default.
    pub fix_duration: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            mime_type_hint: "video/webm".to_string(),
            video_bits_per_second: 2_500_000,
            audio_bits_per_second: 128_000,
            include_audio: true,
            timeslice_ms: 1000,
            grace_period_ms: 100,
            fix_duration: true,
        }
    }
}
