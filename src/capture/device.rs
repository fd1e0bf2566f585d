use anyhow::Result;
use tokio::sync::mpsc;

/// A single slice of encoded media emitted by the encoder during capture
#[derive(Debug, Clone)]
pub struct MediaChunk {
    /// Opaque encoded bytes
    pub data: Vec<u8>,
    /// Timestamp in milliseconds since the encoder started
    pub timestamp_ms: u64,
}

/// Events delivered by a running encoder
#[derive(Debug, Clone)]
pub enum EncoderEvent {
    /// A new encoded chunk is available
    Chunk(MediaChunk),
    /// The encoder hit an internal error (recording should be stopped)
    Error(String),
    /// The capture stream ended outside our control (e.g. the user revoked
    /// capture from the platform's own UI)
    StreamEnded,
}

/// Encoder activity state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// Created but not started, or already stopped
    Inactive,
    /// Actively producing chunks
    Encoding,
}

/// Audio capture constraints passed to the device when audio is requested
#[derive(Debug, Clone)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// A live capture stream handed out by the device
///
/// The stream is exclusively owned by the active session and its tracks must
/// be stopped on every exit path, or the platform keeps its capture
/// indicator lit.
pub trait CaptureStream: Send + Sync {
    /// Whether the platform still reports the stream as live
    fn is_active(&self) -> bool;

    /// Stop all tracks, releasing the underlying capture source
    fn stop_tracks(&mut self);
}

/// A live encoder opened against a capture stream
#[async_trait::async_trait]
pub trait MediaEncoder: Send + Sync {
    /// Start encoding, emitting a chunk roughly every `timeslice_ms`
    ///
    /// Returns a channel receiver that delivers chunks and device-level
    /// error/ended events until the encoder stops.
    async fn start(&mut self, timeslice_ms: u64) -> Result<mpsc::Receiver<EncoderEvent>>;

    /// Ask the encoder to emit any buffered-but-unemitted chunk
    fn request_flush(&mut self);

    /// Stop encoding and close the event channel
    async fn stop(&mut self) -> Result<()>;

    /// Current encoder activity state
    fn state(&self) -> EncoderState;

    /// The negotiated mime type this encoder produces
    fn mime_type(&self) -> &str;
}

/// Capture-and-encode device seam
///
/// Platform implementations wrap whatever the OS or runtime provides
/// (getDisplayMedia + MediaRecorder in a browser shell, ScreenCaptureKit on
/// macOS, ...). The scripted implementation in this crate exists for tests
/// and batch runs. Every call is treated as fallible by the session
/// controller.
#[async_trait::async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Request a live capture stream (video always, audio if constraints are
    /// given). Fails if the user denies or cancels the permission prompt.
    async fn acquire(&self, audio: Option<AudioConstraints>) -> Result<Box<dyn CaptureStream>>;

    /// Whether the device can encode the given mime type
    fn supports_format(&self, mime_type: &str) -> bool;

    /// Open an encoder against the stream with the negotiated format
    async fn open_encoder(
        &self,
        stream: &dyn CaptureStream,
        mime_type: &str,
        video_bits_per_second: u32,
        audio_bits_per_second: u32,
    ) -> Result<Box<dyn MediaEncoder>>;

    /// Device name for logging
    fn name(&self) -> &str;
}
