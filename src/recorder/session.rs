use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::RecorderConfig;
use super::error::RecorderError;
use super::preview::{PreviewRegistry, PreviewUrl};
use super::state::SessionState;
use super::stats::SessionStats;
use crate::capture::{
    negotiate_format, AudioConstraints, CaptureDevice, CaptureStream, EncoderEvent, EncoderState,
    MediaChunk, MediaEncoder,
};
use crate::webm;

/// A finished, self-contained encoded clip
#[derive(Debug, Clone)]
pub struct EncodedClip {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl EncodedClip {
    /// Declared container duration, if the clip carries one
    pub fn duration(&self) -> Option<Duration> {
        webm::clip_duration(&self.data)
    }
}

/// Single-shot completion handle returned by [`ScreenRecorder::start`]
///
/// Settles exactly once when the session finalizes: with the finished clip,
/// or with the error that sank finalization. Callers that need the recorded
/// bytes await this handle, not the return value of `stop`.
pub struct RecordingHandle {
    rx: oneshot::Receiver<Result<EncodedClip, RecorderError>>,
}

impl RecordingHandle {
    pub async fn clip(self) -> Result<EncodedClip, RecorderError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(RecorderError::Finalization(anyhow!(
                "session ended without settling its completion handle"
            ))),
        }
    }
}

type StateCallback = Arc<dyn Fn() + Send + Sync>;
type ObserverList = Mutex<Vec<(u64, StateCallback)>>;

/// Unsubscribe capability returned by [`ScreenRecorder::on_state_change`]
pub struct StateChangeSubscription {
    id: u64,
    observers: Weak<ObserverList>,
}

impl StateChangeSubscription {
    pub fn unsubscribe(self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.lock().unwrap().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Everything exclusively owned by the one in-flight session
struct ActiveSession {
    stream: Box<dyn CaptureStream>,
    encoder: Box<dyn MediaEncoder>,
    mime_type: String,
    started_at: Instant,
    completion: oneshot::Sender<Result<EncodedClip, RecorderError>>,
    event_task: JoinHandle<()>,
}

/// Capture-session controller
///
/// Owns the capture stream, the chunk buffer, the completion channel and the
/// observer set for at most one recording session at a time. All mutual
/// exclusion is the state machine plus the stopping flag; no lock is ever
/// held across an await.
pub struct ScreenRecorder {
    config: RecorderConfig,
    device: Arc<dyn CaptureDevice>,
    active: Mutex<Option<ActiveSession>>,
    state: Mutex<SessionState>,
    stopping: AtomicBool,
    chunks: Arc<Mutex<Vec<MediaChunk>>>,
    observers: Arc<ObserverList>,
    next_observer_id: AtomicU64,
    last_mime_type: Mutex<Option<String>>,
    started_at_wall: Mutex<Option<DateTime<Utc>>>,
    previews: PreviewRegistry,
}

impl ScreenRecorder {
    pub fn new(device: Arc<dyn CaptureDevice>, config: RecorderConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            device,
            active: Mutex::new(None),
            state: Mutex::new(SessionState::Idle),
            stopping: AtomicBool::new(false),
            chunks: Arc::new(Mutex::new(Vec::new())),
            observers: Arc::new(Mutex::new(Vec::new())),
            next_observer_id: AtomicU64::new(0),
            last_mime_type: Mutex::new(None),
            started_at_wall: Mutex::new(None),
            previews: PreviewRegistry::default(),
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Start a new capture session
    ///
    /// Acquires the stream, negotiates the encoding format, opens and starts
    /// the encoder, and returns the completion handle that settles once the
    /// session finalizes. Fails with [`RecorderError::AlreadyRecording`] if a
    /// session is active; any acquisition or encoder-setup failure runs full
    /// cleanup and leaves the controller idle.
    pub async fn start(self: &Arc<Self>) -> Result<RecordingHandle, RecorderError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::Idle {
                return Err(RecorderError::AlreadyRecording);
            }
            *state = SessionState::Starting;
        }
        self.stopping.store(false, Ordering::SeqCst);
        self.chunks.lock().unwrap().clear();

        info!(device = self.device.name(), "starting capture session");

        let audio = self.config.include_audio.then(AudioConstraints::default);
        let mut stream = match self.device.acquire(audio).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("stream acquisition failed: {e:#}");
                self.finish_cleanup();
                return Err(RecorderError::DeviceAcquisition(e));
            }
        };

        let Some(mime_type) = negotiate_format(self.device.as_ref()) else {
            stream.stop_tracks();
            self.finish_cleanup();
            return Err(RecorderError::UnsupportedFormat);
        };

        let mut encoder = match self
            .device
            .open_encoder(
                stream.as_ref(),
                mime_type,
                self.config.video_bits_per_second,
                self.config.audio_bits_per_second,
            )
            .await
        {
            Ok(encoder) => encoder,
            Err(e) => {
                warn!("encoder setup failed: {e:#}");
                stream.stop_tracks();
                self.finish_cleanup();
                return Err(RecorderError::DeviceAcquisition(e));
            }
        };

        let mut events = match encoder.start(self.config.timeslice_ms).await {
            Ok(events) => events,
            Err(e) => {
                warn!("encoder start failed: {e:#}");
                stream.stop_tracks();
                self.finish_cleanup();
                return Err(RecorderError::DeviceAcquisition(e));
            }
        };

        let (completion_tx, completion_rx) = oneshot::channel();

        // Device reactions: append chunks, fold errors and externally ended
        // streams into the stop protocol.
        let chunks = Arc::clone(&self.chunks);
        let recorder = Arc::downgrade(self);
        let event_task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    EncoderEvent::Chunk(chunk) => {
                        if chunk.data.is_empty() {
                            continue;
                        }
                        chunks.lock().unwrap().push(chunk);
                    }
                    EncoderEvent::Error(message) => {
                        error!(%message, "capture device reported an error");
                        trigger_stop(&recorder);
                    }
                    EncoderEvent::StreamEnded => {
                        info!("capture stream ended externally");
                        trigger_stop(&recorder);
                    }
                }
            }
        });

        *self.active.lock().unwrap() = Some(ActiveSession {
            stream,
            encoder,
            mime_type: mime_type.to_string(),
            started_at: Instant::now(),
            completion: completion_tx,
            event_task,
        });
        *self.started_at_wall.lock().unwrap() = Some(Utc::now());
        *self.last_mime_type.lock().unwrap() = Some(mime_type.to_string());

        *self.state.lock().unwrap() = SessionState::Recording;
        self.notify_state_change();
        info!(mime_type, "recording started");

        Ok(RecordingHandle { rx: completion_rx })
    }

    /// Stop the active session and finalize the clip
    ///
    /// Requests a final encoder flush, waits the configured grace window for
    /// in-flight chunks, concatenates the buffer, repairs the container
    /// duration if enabled, and settles the completion handle. Cleanup runs
    /// unconditionally; this is the only place state returns to idle once
    /// capture has begun. Finalization failures travel through the
    /// completion handle, so this returns `Ok(())` for them.
    pub async fn stop(&self) -> Result<(), RecorderError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::Recording || self.stopping.swap(true, Ordering::SeqCst) {
                return Err(RecorderError::NotRecording);
            }
            *state = SessionState::Stopping;
        }

        info!("stopping capture session");

        let Some(mut session) = self.active.lock().unwrap().take() else {
            self.finish_cleanup();
            return Err(RecorderError::NotRecording);
        };

        if session.encoder.state() == EncoderState::Encoding {
            session.encoder.request_flush();
        }
        let elapsed = session.started_at.elapsed();

        // Grace window for the final flushed chunk; anything later is
        // dropped.
        tokio::time::sleep(Duration::from_millis(self.config.grace_period_ms)).await;

        let stop_result = session.encoder.stop().await;

        let buffered: Vec<MediaChunk> = std::mem::take(&mut *self.chunks.lock().unwrap());
        let mut data = Vec::with_capacity(buffered.iter().map(|c| c.data.len()).sum());
        for chunk in &buffered {
            data.extend_from_slice(&chunk.data);
        }

        let outcome = match stop_result {
            Err(e) => {
                warn!("encoder failed to finalize: {e:#}");
                Err(RecorderError::Finalization(e))
            }
            Ok(()) => {
                let data = if self.config.fix_duration {
                    webm::set_duration(&data, elapsed)
                } else {
                    data
                };
                info!(
                    chunks = buffered.len(),
                    bytes = data.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "recording finalized"
                );
                Ok(EncodedClip {
                    data,
                    mime_type: session.mime_type.clone(),
                })
            }
        };

        if session.completion.send(outcome).is_err() {
            debug!("completion handle dropped before finalization");
        }

        session.event_task.abort();
        session.stream.stop_tracks();
        self.finish_cleanup();
        Ok(())
    }

    /// Whether a session is actively capturing
    ///
    /// True iff the device handle exists, the encoder reports itself
    /// encoding, the stream is still live, and no stop is in progress.
    /// Derived from those fields on every call, never cached.
    pub fn is_recording(&self) -> bool {
        if self.stopping.load(Ordering::SeqCst) {
            return false;
        }
        let active = self.active.lock().unwrap();
        match active.as_ref() {
            Some(session) => {
                session.encoder.state() == EncoderState::Encoding && session.stream.is_active()
            }
            None => false,
        }
    }

    /// Current state-machine state
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Snapshot for shells and diagnostics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            is_recording: self.is_recording(),
            state: self.state(),
            started_at: *self.started_at_wall.lock().unwrap(),
            chunks_buffered: self.chunks.lock().unwrap().len(),
            mime_type: self.last_mime_type.lock().unwrap().clone(),
        }
    }

    /// Register a state-change observer; returns its unsubscribe capability
    ///
    /// Observers run synchronously in registration order on every externally
    /// visible transition. A panicking observer is isolated and logged, and
    /// the rest still run.
    pub fn on_state_change(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> StateChangeSubscription {
        let id = self.next_observer_id.fetch_add(1, Ordering::SeqCst);
        self.observers.lock().unwrap().push((id, Arc::new(callback)));
        StateChangeSubscription {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }

    /// Wrap finished clip bytes into a revocable preview handle tagged with
    /// the last recording's mime type. No effect on session state.
    pub fn create_preview_from_buffer(&self, data: &[u8]) -> PreviewUrl {
        let mime_type = self
            .last_mime_type
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| "video/webm".to_string());
        self.previews.create(data, &mime_type)
    }

    /// Release a preview handle, dropping the bytes behind it
    pub fn release_preview_url(&self, url: &PreviewUrl) {
        self.previews.release(url);
    }

    /// Bytes and mime type behind a live preview handle
    pub fn preview_data(&self, url: &PreviewUrl) -> Option<(Arc<Vec<u8>>, String)> {
        self.previews.resolve(url)
    }

    // Sole place state returns to idle. Always notifies.
    fn finish_cleanup(&self) {
        self.chunks.lock().unwrap().clear();
        self.stopping.store(false, Ordering::SeqCst);
        *self.state.lock().unwrap() = SessionState::Idle;
        self.notify_state_change();
    }

    fn notify_state_change(&self) {
        let callbacks: Vec<StateCallback> = self
            .observers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                warn!("state-change observer panicked");
            }
        }
    }
}

// Device-driven stops (encoder error, externally ended stream) reuse the
// explicit stop path; the stopping flag makes duplicate triggers a no-op.
fn trigger_stop(recorder: &Weak<ScreenRecorder>) {
    let Some(recorder) = recorder.upgrade() else {
        return;
    };
    tokio::spawn(async move {
        // An event raised during startup can land here before `start` has
        // moved the state machine past Starting; wait it out so the stop is
        // not rejected and the session left running.
        while recorder.state() == SessionState::Starting {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        if let Err(e) = recorder.stop().await {
            debug!("implicit stop skipped: {e}");
        }
    });
}
