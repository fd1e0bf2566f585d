pub mod device;
pub mod format;
pub mod scripted;

pub use device::{
    AudioConstraints, CaptureDevice, CaptureStream, EncoderEvent, EncoderState, MediaChunk,
    MediaEncoder,
};
pub use format::{negotiate_format, FORMAT_PREFERENCES};
pub use scripted::{CaptureScript, ScriptedDevice};
