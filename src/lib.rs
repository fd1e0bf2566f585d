pub mod capture;
pub mod config;
pub mod recorder;
pub mod webm;

pub use capture::{
    AudioConstraints, CaptureDevice, CaptureScript, CaptureStream, EncoderEvent, EncoderState,
    MediaChunk, MediaEncoder, ScriptedDevice, FORMAT_PREFERENCES,
};
pub use config::Config;
pub use recorder::{
    EncodedClip, PreviewUrl, RecorderConfig, RecorderError, RecordingHandle, ScreenRecorder,
    SessionState, SessionStats, StateChangeSubscription,
};
