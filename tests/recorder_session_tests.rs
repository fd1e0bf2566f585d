// Integration tests for the capture-session controller
//
// A scripted capture device stands in for the platform, so every state
// transition, error path and chunk-ordering guarantee is exercised
// deterministically.

use anyhow::Result;
use screenclip::webm::clip_duration;
use screenclip::{
    CaptureScript, RecorderConfig, RecorderError, ScreenRecorder, ScriptedDevice, SessionState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn test_config() -> RecorderConfig {
    RecorderConfig {
        timeslice_ms: 10,
        grace_period_ms: 50,
        fix_duration: false,
        ..RecorderConfig::default()
    }
}

fn recorder_with(script: CaptureScript, config: RecorderConfig) -> Arc<ScreenRecorder> {
    ScreenRecorder::new(Arc::new(ScriptedDevice::new(script)), config)
}

#[tokio::test]
async fn start_stop_cycle_delivers_ordered_chunks() -> Result<()> {
    let script = CaptureScript {
        flush_chunk: Some(b"ff".to_vec()),
        ..CaptureScript::emitting(vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()])
    };
    let recorder = recorder_with(script, test_config());

    let handle = recorder.start().await?;
    assert!(recorder.is_recording());
    assert_eq!(recorder.state(), SessionState::Recording);

    // Let all three scripted chunks arrive (one per 10ms timeslice)
    tokio::time::sleep(Duration::from_millis(45)).await;
    recorder.stop().await?;

    let clip = handle.clip().await?;
    assert_eq!(
        clip.data, b"aabbccff",
        "chunks must be concatenated in emission order, flush chunk last"
    );
    assert_eq!(clip.mime_type, "video/webm;codecs=vp8,opus");
    assert!(!recorder.is_recording());
    assert_eq!(recorder.state(), SessionState::Idle);

    Ok(())
}

#[tokio::test]
async fn is_recording_false_in_every_state_but_recording() -> Result<()> {
    let recorder = recorder_with(
        CaptureScript::emitting(vec![b"x".to_vec()]),
        test_config(),
    );

    assert!(!recorder.is_recording(), "idle controller is not recording");

    let handle = recorder.start().await?;
    assert!(recorder.is_recording());

    recorder.stop().await?;
    handle.clip().await?;
    assert!(!recorder.is_recording(), "post-cleanup controller is idle");

    Ok(())
}

#[tokio::test]
async fn start_while_recording_fails_and_leaves_state_unchanged() -> Result<()> {
    let recorder = recorder_with(CaptureScript::emitting(vec![b"x".to_vec()]), test_config());

    let handle = recorder.start().await?;
    let second = recorder.start().await;
    assert!(matches!(second, Err(RecorderError::AlreadyRecording)));
    assert!(recorder.is_recording(), "failed start must not disturb the session");
    assert_eq!(recorder.state(), SessionState::Recording);

    recorder.stop().await?;
    handle.clip().await?;
    Ok(())
}

#[tokio::test]
async fn stop_while_idle_fails() {
    let recorder = recorder_with(CaptureScript::default(), test_config());
    let result = recorder.stop().await;
    assert!(matches!(result, Err(RecorderError::NotRecording)));
}

#[tokio::test]
async fn reentrant_stop_is_rejected() -> Result<()> {
    let recorder = recorder_with(CaptureScript::emitting(vec![b"x".to_vec()]), test_config());

    let handle = recorder.start().await?;
    let (first, second) = tokio::join!(recorder.stop(), recorder.stop());
    assert!(first.is_ok());
    assert!(matches!(second, Err(RecorderError::NotRecording)));

    // The completion handle settles exactly once
    handle.clip().await?;
    Ok(())
}

#[tokio::test]
async fn controller_is_reusable_after_cleanup() -> Result<()> {
    let recorder = recorder_with(
        CaptureScript {
            flush_chunk: Some(b"f".to_vec()),
            ..CaptureScript::emitting(vec![b"1".to_vec(), b"2".to_vec()])
        },
        test_config(),
    );

    let handle = recorder.start().await?;
    tokio::time::sleep(Duration::from_millis(35)).await;
    recorder.stop().await?;
    let first = handle.clip().await?;
    assert_eq!(first.data, b"12f");

    // Second session must not see chunks from the first
    let handle = recorder.start().await?;
    tokio::time::sleep(Duration::from_millis(35)).await;
    recorder.stop().await?;
    let second = handle.clip().await?;
    assert_eq!(second.data, b"12f", "no duplication or carry-over between sessions");

    Ok(())
}

#[tokio::test]
async fn zero_chunk_session_resolves_with_empty_clip() -> Result<()> {
    let config = RecorderConfig {
        include_audio: false,
        ..test_config()
    };
    let recorder = recorder_with(CaptureScript::default(), config);

    let handle = recorder.start().await?;
    recorder.stop().await?;

    let clip = handle.clip().await?;
    assert!(clip.data.is_empty(), "empty clip is a valid outcome, not an error");
    assert_eq!(clip.mime_type, "video/webm;codecs=vp8,opus");
    Ok(())
}

#[tokio::test]
async fn denied_acquisition_surfaces_and_never_reports_recording() -> Result<()> {
    let script = CaptureScript {
        deny_acquisition: true,
        ..CaptureScript::default()
    };
    let recorder = recorder_with(script, test_config());

    let observed_states = Arc::new(Mutex::new(Vec::new()));
    let weak = Arc::downgrade(&recorder);
    let states = Arc::clone(&observed_states);
    let subscription = recorder.on_state_change(move || {
        if let Some(recorder) = weak.upgrade() {
            states.lock().unwrap().push(recorder.state());
        }
    });

    let result = recorder.start().await;
    assert!(matches!(result, Err(RecorderError::DeviceAcquisition(_))));
    assert!(!recorder.is_recording());
    assert_eq!(recorder.state(), SessionState::Idle);
    assert!(
        !observed_states
            .lock()
            .unwrap()
            .contains(&SessionState::Recording),
        "no observer may ever have seen a recording state"
    );

    subscription.unsubscribe();
    Ok(())
}

#[tokio::test]
async fn no_supported_format_surfaces_after_cleanup() {
    let script = CaptureScript {
        supported_formats: Vec::new(),
        ..CaptureScript::default()
    };
    let recorder = recorder_with(script, test_config());

    let result = recorder.start().await;
    assert!(matches!(result, Err(RecorderError::UnsupportedFormat)));
    assert_eq!(recorder.state(), SessionState::Idle);
}

#[tokio::test]
async fn encoder_setup_failure_surfaces_after_cleanup() {
    let script = CaptureScript {
        fail_encoder_open: true,
        ..CaptureScript::default()
    };
    let recorder = recorder_with(script, test_config());

    let result = recorder.start().await;
    assert!(matches!(result, Err(RecorderError::DeviceAcquisition(_))));
    assert_eq!(recorder.state(), SessionState::Idle);
    assert!(!recorder.is_recording());
}

#[tokio::test]
async fn repaired_clip_duration_tracks_wall_clock_time() -> Result<()> {
    // One chunk carrying a minimal WebM skeleton (EBML header, unknown-size
    // Segment, Info with the default TimecodeScale) so finalization has a
    // container to write the measured duration into
    let mut skeleton = vec![0x1A, 0x45, 0xDF, 0xA3, 0x80];
    skeleton.extend_from_slice(&[0x18, 0x53, 0x80, 0x67, 0xFF]);
    skeleton.extend_from_slice(&[0x15, 0x49, 0xA9, 0x66, 0x88]);
    skeleton.extend_from_slice(&[0x2A, 0xD7, 0xB1, 0x84]);
    skeleton.extend_from_slice(&1_000_000u32.to_be_bytes());

    let config = RecorderConfig {
        fix_duration: true,
        ..test_config()
    };
    let recorder = recorder_with(CaptureScript::emitting(vec![skeleton]), config);

    let handle = recorder.start().await?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    recorder.stop().await?;
    let clip = handle.clip().await?;

    let declared = clip
        .duration()
        .expect("finalized clip must declare a duration");
    assert!(
        declared >= Duration::from_millis(140),
        "declared duration {declared:?} undershoots the recorded time"
    );
    assert!(
        declared <= Duration::from_millis(600),
        "declared duration {declared:?} overshoots the recorded time"
    );

    // Round-trip through a file the way a shell would persist the clip
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("clip.webm");
    std::fs::write(&path, &clip.data)?;
    let bytes = std::fs::read(&path)?;
    assert_eq!(clip_duration(&bytes), Some(declared));

    Ok(())
}

#[tokio::test]
async fn error_raised_during_startup_still_winds_the_session_down() -> Result<()> {
    // The encoder reports an error before the first timeslice has elapsed,
    // racing the tail end of start(); the session must still settle and
    // return to idle rather than run on unstoppable.
    let script = CaptureScript {
        error_on_start: true,
        ..CaptureScript::default()
    };
    let recorder = recorder_with(script, test_config());

    let handle = recorder.start().await?;
    let clip = handle.clip().await?;

    assert!(clip.data.is_empty());
    assert_eq!(recorder.state(), SessionState::Idle);
    assert!(!recorder.is_recording());
    Ok(())
}

#[tokio::test]
async fn device_error_becomes_an_implicit_stop() -> Result<()> {
    // Chunk 0 arrives, then the encoder reports an error instead of chunk 1
    let script = CaptureScript {
        error_at_chunk: Some(1),
        ..CaptureScript::emitting(vec![b"c0".to_vec(), b"c1".to_vec()])
    };
    let recorder = recorder_with(script, test_config());

    let handle = recorder.start().await?;
    let clip = handle.clip().await?;

    assert_eq!(clip.data, b"c0", "what was captured before the error is delivered");
    assert!(!recorder.is_recording());
    assert_eq!(recorder.state(), SessionState::Idle);
    Ok(())
}

#[tokio::test]
async fn externally_ended_stream_becomes_an_implicit_stop() -> Result<()> {
    let script = CaptureScript {
        end_stream_at_chunk: Some(1),
        ..CaptureScript::emitting(vec![b"c0".to_vec(), b"c1".to_vec()])
    };
    let recorder = recorder_with(script, test_config());

    let handle = recorder.start().await?;
    let clip = handle.clip().await?;

    assert_eq!(clip.data, b"c0");
    assert!(!recorder.is_recording());
    Ok(())
}

#[tokio::test]
async fn finalization_failure_rejects_the_handle_but_still_cleans_up() -> Result<()> {
    let script = CaptureScript {
        fail_stop: true,
        ..CaptureScript::emitting(vec![b"c0".to_vec()])
    };
    let recorder = recorder_with(script, test_config());

    let handle = recorder.start().await?;
    tokio::time::sleep(Duration::from_millis(25)).await;

    // stop() itself succeeds; the failure travels through the handle
    recorder.stop().await?;
    let outcome = handle.clip().await;
    assert!(matches!(outcome, Err(RecorderError::Finalization(_))));

    assert!(!recorder.is_recording());
    assert_eq!(recorder.state(), SessionState::Idle);

    // No leaked exclusive state: a fresh session still starts
    let handle = recorder.start().await?;
    assert!(recorder.is_recording());
    recorder.stop().await?;
    let _ = handle.clip().await;
    Ok(())
}

#[tokio::test]
async fn observers_fire_on_start_and_cleanup_and_unsubscribe_silences_them() -> Result<()> {
    let recorder = recorder_with(CaptureScript::emitting(vec![b"x".to_vec()]), test_config());

    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notifications);
    let subscription = recorder.on_state_change(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let handle = recorder.start().await?;
    let after_start = notifications.load(Ordering::SeqCst);
    assert!(after_start >= 1, "successful start must notify");

    recorder.stop().await?;
    handle.clip().await?;
    let after_stop = notifications.load(Ordering::SeqCst);
    assert!(after_stop > after_start, "cleanup must notify");

    subscription.unsubscribe();
    let handle = recorder.start().await?;
    recorder.stop().await?;
    let _ = handle.clip().await;
    assert_eq!(
        notifications.load(Ordering::SeqCst),
        after_stop,
        "unsubscribed observer receives no further notifications"
    );

    Ok(())
}

#[tokio::test]
async fn panicking_observer_does_not_block_the_rest() -> Result<()> {
    let recorder = recorder_with(CaptureScript::emitting(vec![b"x".to_vec()]), test_config());

    let _bad = recorder.on_state_change(|| panic!("observer bug"));
    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notifications);
    let _good = recorder.on_state_change(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let handle = recorder.start().await?;
    assert!(
        notifications.load(Ordering::SeqCst) >= 1,
        "later observers still run after an earlier one panicked"
    );

    recorder.stop().await?;
    handle.clip().await?;
    Ok(())
}
