use anyhow::{Context, Result};
use clap::Parser;
use screenclip::{CaptureScript, Config, RecorderConfig, ScreenRecorder, ScriptedDevice};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Drive a scripted capture session end to end and write the finished clip.
///
/// Platform shells bring their own capture device; this binary exercises the
/// session controller against the scripted one.
#[derive(Parser)]
#[command(name = "screenclip")]
struct Args {
    /// Config file (recorder settings and output path)
    #[arg(long)]
    config: Option<String>,

    /// How long to record before stopping
    #[arg(long, default_value_t = 3)]
    record_secs: u64,

    /// Where to write the clip, overriding the config file
    #[arg(long)]
    output: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let (recorder_config, output_path) = match &args.config {
        Some(path) => {
            let cfg = Config::load(path)?;
            (cfg.recorder_config(), cfg.output.clip_path.clone())
        }
        None => (RecorderConfig::default(), "clip.webm".to_string()),
    };
    let output_path = args.output.unwrap_or(output_path);

    // One scripted chunk per timeslice, with spares so the script outlasts
    // the requested recording time
    let ticks = (args.record_secs * 1000 / recorder_config.timeslice_ms.max(1)).max(1) as usize;
    let chunks = (0..ticks + 4).map(|i| vec![i as u8; 4096]).collect();
    let device = Arc::new(ScriptedDevice::new(CaptureScript {
        flush_chunk: Some(vec![0xEE; 512]),
        ..CaptureScript::emitting(chunks)
    }));

    let recorder = ScreenRecorder::new(device, recorder_config);
    let subscription = recorder.on_state_change(|| info!("recorder state changed"));

    let handle = recorder.start().await?;
    info!(recording = recorder.is_recording(), "session running");

    tokio::time::sleep(Duration::from_secs(args.record_secs)).await;
    recorder.stop().await?;

    let clip = handle.clip().await?;
    std::fs::write(&output_path, &clip.data)
        .with_context(|| format!("failed to write {output_path}"))?;
    subscription.unsubscribe();

    let summary = serde_json::json!({
        "path": output_path,
        "bytes": clip.data.len(),
        "mime_type": clip.mime_type,
        "declared_duration_ms": clip.duration().map(|d| d.as_millis() as u64),
        "stats": recorder.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
