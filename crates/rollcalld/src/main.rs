use anyhow::{Context, Result};
use rollcall_core::CaptureStatus;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env();
    let settings = config.load_settings().context("loading engine settings")?;
    let roster = rollcall_core::load_roster(&config.roster_path)
        .with_context(|| format!("loading roster {}", config.roster_path.display()))?;

    let engine = engine::spawn_engine(&config, settings).context("starting engine")?;
    if !engine.service.start(roster) {
        anyhow::bail!("attendance session already running");
    }

    tracing::info!("rollcalld ready");

    // Run until signaled or until the camera gives up.
    let mut poll = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                tracing::info!("rollcalld shutting down");
                break;
            }
            _ = poll.tick() => {
                if engine.is_capture_finished() {
                    tracing::error!("capture stopped unexpectedly");
                    break;
                }
            }
        }
    }

    engine.service.stop();
    let service = engine.service.clone();
    let (status, frame) = tokio::task::spawn_blocking(move || engine.shutdown()).await?;

    if let Some(snapshot) = service.snapshot() {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    if let (Some(path), Some(frame)) = (&config.snapshot_path, frame) {
        frame
            .save(path)
            .with_context(|| format!("writing snapshot {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote annotated snapshot");
    }

    match status {
        CaptureStatus::Failed {
            consecutive_failures,
            last_error,
        } => anyhow::bail!(
            "camera failed after {consecutive_failures} consecutive reads: {}",
            last_error.map_or_else(|| "empty frames".to_string(), |e| e.to_string())
        ),
        _ => Ok(()),
    }
}
