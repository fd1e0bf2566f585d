// Scripted in-memory capture device
//
// Deterministic CaptureDevice implementation used by tests and the demo
// binary. Emits a configured sequence of chunk payloads on the encoder
// timeslice and can inject the failure modes a real platform device exhibits
// (denied permission, no supported format, mid-stream errors, externally
// ended streams, failing finalization).

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::device::{
    AudioConstraints, CaptureDevice, CaptureStream, EncoderEvent, EncoderState, MediaChunk,
    MediaEncoder,
};

/// Script driving a [`ScriptedDevice`]
#[derive(Debug, Clone)]
pub struct CaptureScript {
    /// Chunk payloads emitted one per timeslice, in order
    pub chunks: Vec<Vec<u8>>,
    /// Extra chunk emitted when the session requests a final flush
    pub flush_chunk: Option<Vec<u8>>,
    /// Mime types the device claims to support
    pub supported_formats: Vec<String>,
    /// Reject `acquire` as if the user denied the permission prompt
    pub deny_acquisition: bool,
    /// Reject `open_encoder`
    pub fail_encoder_open: bool,
    /// Emit an encoder error event immediately on start, before any chunk
    pub error_on_start: bool,
    /// Emit an encoder error event instead of the chunk at this index
    pub error_at_chunk: Option<usize>,
    /// End the stream externally instead of emitting the chunk at this index
    pub end_stream_at_chunk: Option<usize>,
    /// Make `MediaEncoder::stop` fail
    pub fail_stop: bool,
}

impl Default for CaptureScript {
    fn default() -> Self {
        Self {
            chunks: Vec::new(),
            flush_chunk: None,
            supported_formats: vec![
                "video/webm;codecs=vp8,opus".to_string(),
                "video/webm".to_string(),
            ],
            deny_acquisition: false,
            fail_encoder_open: false,
            error_on_start: false,
            error_at_chunk: None,
            end_stream_at_chunk: None,
            fail_stop: false,
        }
    }
}

impl CaptureScript {
    /// Script that emits the given payloads and nothing else
    pub fn emitting(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            ..Self::default()
        }
    }
}

/// Deterministic capture-and-encode device driven by a [`CaptureScript`]
pub struct ScriptedDevice {
    script: CaptureScript,
    // Liveness flag of the most recently acquired stream, shared with the
    // encoder so externally ended streams deactivate both.
    last_stream: std::sync::Mutex<Option<Arc<AtomicBool>>>,
}

impl ScriptedDevice {
    pub fn new(script: CaptureScript) -> Self {
        Self {
            script,
            last_stream: std::sync::Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl CaptureDevice for ScriptedDevice {
    async fn acquire(&self, audio: Option<AudioConstraints>) -> Result<Box<dyn CaptureStream>> {
        if self.script.deny_acquisition {
            bail!("screen capture permission denied");
        }
        debug!(audio = audio.is_some(), "scripted stream acquired");
        let active = Arc::new(AtomicBool::new(true));
        *self.last_stream.lock().unwrap() = Some(Arc::clone(&active));
        Ok(Box::new(ScriptedStream { active }))
    }

    fn supports_format(&self, mime_type: &str) -> bool {
        self.script
            .supported_formats
            .iter()
            .any(|f| f == mime_type)
    }

    async fn open_encoder(
        &self,
        stream: &dyn CaptureStream,
        mime_type: &str,
        _video_bits_per_second: u32,
        _audio_bits_per_second: u32,
    ) -> Result<Box<dyn MediaEncoder>> {
        if self.script.fail_encoder_open {
            bail!("encoder rejected stream");
        }
        if !stream.is_active() {
            bail!("capture stream is no longer active");
        }
        let stream_active = self
            .last_stream
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Arc::new(AtomicBool::new(true)));
        Ok(Box::new(ScriptedEncoder {
            script: self.script.clone(),
            mime_type: mime_type.to_string(),
            encoding: Arc::new(AtomicBool::new(false)),
            stream_active,
            cmd_tx: None,
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Capture stream whose liveness is a shared flag
pub struct ScriptedStream {
    active: Arc<AtomicBool>,
}

impl CaptureStream for ScriptedStream {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn stop_tracks(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        debug!("scripted stream tracks stopped");
    }
}

enum EncoderCommand {
    Flush,
    Stop,
}

struct ScriptedEncoder {
    script: CaptureScript,
    mime_type: String,
    encoding: Arc<AtomicBool>,
    stream_active: Arc<AtomicBool>,
    cmd_tx: Option<mpsc::Sender<EncoderCommand>>,
}

#[async_trait::async_trait]
impl MediaEncoder for ScriptedEncoder {
    async fn start(&mut self, timeslice_ms: u64) -> Result<mpsc::Receiver<EncoderEvent>> {
        let (event_tx, event_rx) = mpsc::channel(100);
        let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
        self.cmd_tx = Some(cmd_tx);
        self.encoding.store(true, Ordering::SeqCst);

        let script = self.script.clone();
        let stream_active = Arc::clone(&self.stream_active);

        tokio::spawn(async move {
            if script.error_on_start {
                let _ = event_tx
                    .send(EncoderEvent::Error("scripted encoder failure".to_string()))
                    .await;
            }
            let mut flush_chunk = script.flush_chunk.clone();
            let mut idx = 0;
            loop {
                if idx < script.chunks.len() {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(timeslice_ms)) => {
                            if script.error_at_chunk == Some(idx) {
                                let _ = event_tx.send(EncoderEvent::Error(
                                    "scripted encoder failure".to_string(),
                                )).await;
                                idx += 1;
                                continue;
                            }
                            if script.end_stream_at_chunk == Some(idx) {
                                stream_active.store(false, Ordering::SeqCst);
                                let _ = event_tx.send(EncoderEvent::StreamEnded).await;
                                idx += 1;
                                continue;
                            }
                            let chunk = MediaChunk {
                                data: script.chunks[idx].clone(),
                                timestamp_ms: (idx as u64 + 1) * timeslice_ms,
                            };
                            if event_tx.send(EncoderEvent::Chunk(chunk)).await.is_err() {
                                break;
                            }
                            idx += 1;
                        }
                        cmd = cmd_rx.recv() => match cmd {
                            Some(EncoderCommand::Flush) => {
                                if let Some(data) = flush_chunk.take() {
                                    let chunk = MediaChunk {
                                        data,
                                        timestamp_ms: idx as u64 * timeslice_ms,
                                    };
                                    let _ = event_tx.send(EncoderEvent::Chunk(chunk)).await;
                                }
                            }
                            Some(EncoderCommand::Stop) | None => break,
                        }
                    }
                } else {
                    // Script exhausted: idle until flushed or stopped
                    match cmd_rx.recv().await {
                        Some(EncoderCommand::Flush) => {
                            if let Some(data) = flush_chunk.take() {
                                let chunk = MediaChunk {
                                    data,
                                    timestamp_ms: idx as u64 * timeslice_ms,
                                };
                                let _ = event_tx.send(EncoderEvent::Chunk(chunk)).await;
                            }
                        }
                        Some(EncoderCommand::Stop) | None => break,
                    }
                }
            }
            debug!("scripted encoder task finished");
        });

        Ok(event_rx)
    }

    fn request_flush(&mut self) {
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.try_send(EncoderCommand::Flush);
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.encoding.store(false, Ordering::SeqCst);
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(EncoderCommand::Stop).await;
        }
        if self.script.fail_stop {
            bail!("scripted encoder failed to finalize");
        }
        Ok(())
    }

    fn state(&self) -> EncoderState {
        if self.encoding.load(Ordering::SeqCst) {
            EncoderState::Encoding
        } else {
            EncoderState::Inactive
        }
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }
}
