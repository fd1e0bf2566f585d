//! Capture-session controller
//!
//! The core of the crate: one controller owns at most one recording session
//! at a time, drives the start/stop protocol against a capture-and-encode
//! device, buffers encoded chunks, repairs the finished container's duration
//! header, and notifies observers of state transitions.

pub mod config;
pub mod error;
pub mod preview;
pub mod session;
pub mod state;
pub mod stats;

pub use config::RecorderConfig;
pub use error::RecorderError;
pub use preview::PreviewUrl;
pub use session::{EncodedClip, RecordingHandle, ScreenRecorder, StateChangeSubscription};
pub use state::SessionState;
pub use stats::SessionStats;
