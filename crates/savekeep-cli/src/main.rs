use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use savekeep_core::mock::MockEngine;
use savekeep_core::{
    AutoSaveConfig, DirectorySink, MemorySink, RewindConfig, RewindMode, SaveSession, SaveSink,
    SessionConfig,
};

/// Save scheduler and rewind simulator
#[derive(Parser, Debug)]
#[command(name = "savekeep")]
#[command(about = "Drives the save scheduler and rewind buffer against a simulated engine", long_about = None)]
struct Args {
    /// How long to record rewind history before rewinding (seconds)
    #[arg(long, default_value = "5")]
    capture_secs: u64,

    /// How long to hold the rewind button (seconds)
    #[arg(long, default_value = "2")]
    rewind_secs: u64,

    /// Maximum number of snapshots kept for rewind
    #[arg(long, default_value = "60")]
    capacity: usize,

    /// Interval between rewind captures (milliseconds)
    #[arg(long, default_value = "500")]
    capture_interval_ms: u64,

    /// Simulated latency of each engine capture/restore (milliseconds)
    #[arg(long, default_value = "20")]
    engine_latency_ms: u64,

    /// Enable auto-save with this interval (seconds)
    #[arg(long)]
    auto_save_secs: Option<u64>,

    /// Write saves into this directory instead of keeping them in memory
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Load this state file into the engine before starting
    #[arg(long)]
    load: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

/// Frame rate of the simulated engine.
const FRAME_TIME: Duration = Duration::from_micros(16_667);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = SessionConfig {
        rewind: RewindConfig {
            capacity: args.capacity,
            capture_interval: Duration::from_millis(args.capture_interval_ms),
            ..RewindConfig::default()
        },
        auto_save: AutoSaveConfig {
            interval: args.auto_save_secs.map(Duration::from_secs),
        },
        ..SessionConfig::default()
    };

    let sink: Arc<dyn SaveSink> = match &args.out_dir {
        Some(dir) => Arc::new(
            DirectorySink::new(dir)
                .with_context(|| format!("cannot use {} as save directory", dir.display()))?,
        ),
        None => Arc::new(MemorySink::new()),
    };

    let engine = MockEngine::new();
    engine.set_latency(Duration::from_millis(args.engine_latency_ms));

    // Stand-in for the emulation loop.
    let ticker = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut frames = tokio::time::interval(FRAME_TIME);
            loop {
                frames.tick().await;
                engine.step();
            }
        })
    };

    let session = SaveSession::with_sink(engine.clone(), config, sink);

    if let Some(path) = &args.load {
        let bytes =
            std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
        session.load_snapshot(bytes).await?;
        info!(path = %path.display(), state = %String::from_utf8_lossy(&engine.state()), "state loaded");
    }

    session.start_capture();
    info!(secs = args.capture_secs, "recording rewind history");
    tokio::time::sleep(Duration::from_secs(args.capture_secs)).await;

    match session.request_save().await {
        Ok(blob) => info!(bytes = blob.len(), "manual save taken"),
        Err(err) => warn!(%err, "manual save failed"),
    }

    let before = String::from_utf8_lossy(&engine.state()).into_owned();
    session.start_rewind();
    tokio::time::sleep(Duration::from_secs(args.rewind_secs)).await;
    session.stop_rewind();
    info!(
        before = %before,
        after = %String::from_utf8_lossy(&engine.state()),
        "rewind released"
    );

    // Wait for capture to come back after the settle delay.
    let settle = RewindConfig::default().settle_delay + Duration::from_millis(100);
    tokio::time::sleep(settle).await;
    let status = session.status();
    if status.rewind.mode != RewindMode::Capturing {
        warn!(mode = ?status.rewind.mode, "capture did not resume after rewinding");
    }
    info!(?status, "session status");

    if let Some(blob) = session.shutdown().await {
        info!(bytes = blob.len(), "emergency save delivered");
    }
    ticker.abort();

    Ok(())
}
