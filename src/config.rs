use anyhow::Result;
use serde::Deserialize;

use crate::recorder::RecorderConfig;

/// Application configuration for the demo binary
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub recorder: RecorderSettings,
    pub output: OutputConfig,
}

/// Recorder settings as they appear in the config file; all optional, with
/// the controller defaults filled in
#[derive(Debug, Deserialize, Default)]
pub struct RecorderSettings {
    pub mime_type_hint: Option<String>,
    pub video_bits_per_second: Option<u32>,
    pub audio_bits_per_second: Option<u32>,
    pub include_audio: Option<bool>,
    pub timeslice_ms: Option<u64>,
    pub grace_period_ms: Option<u64>,
    pub fix_duration: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    pub clip_path: String,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        let defaults = RecorderConfig::default();
        RecorderConfig {
            mime_type_hint: self
                .recorder
                .mime_type_hint
                .clone()
                .unwrap_or(defaults.mime_type_hint),
            video_bits_per_second: self
                .recorder
                .video_bits_per_second
                .unwrap_or(defaults.video_bits_per_second),
            audio_bits_per_second: self
                .recorder
                .audio_bits_per_second
                .unwrap_or(defaults.audio_bits_per_second),
            include_audio: self.recorder.include_audio.unwrap_or(defaults.include_audio),
            timeslice_ms: self.recorder.timeslice_ms.unwrap_or(defaults.timeslice_ms),
            grace_period_ms: self
                .recorder
                .grace_period_ms
                .unwrap_or(defaults.grace_period_ms),
            fix_duration: self.recorder.fix_duration.unwrap_or(defaults.fix_duration),
        }
    }
}
