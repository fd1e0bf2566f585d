use thiserror::Error;

/// Errors surfaced by the capture-session controller
#[derive(Debug, Error)]
pub enum RecorderError {
    /// `start` called while a session is active; state is unchanged
    #[error("already recording")]
    AlreadyRecording,

    /// `stop` called while idle or while a stop is already in progress;
    /// state is unchanged
    #[error("not recording")]
    NotRecording,

    /// No candidate in the format preference list was accepted by the device
    #[error("no supported recording format found")]
    UnsupportedFormat,

    /// Stream acquisition or encoder setup failed (permission denied, no
    /// capture source, encoder rejected the stream)
    #[error("capture device error: {0}")]
    DeviceAcquisition(#[source] anyhow::Error),

    /// Finalization failed after capture ended; delivered through the
    /// completion handle, never from `stop` itself
    #[error("failed to finalize recording: {0}")]
    Finalization(#[source] anyhow::Error),
}
