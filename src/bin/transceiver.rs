//! Audio Transceiver Application
//!
//! Half-duplex text chat over the sound card. Lines typed on stdin are
//! transmitted; received payloads are printed with a timestamp.
//!
//! Usage: `transceiver [config.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, MissedTickBehavior};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_transceiver::{
    audio::{CpalBackend, StreamDirection},
    config::AppConfig,
    modem::ToneModemFactory,
    output::ConsoleSink,
    Transceiver,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting audio transceiver");

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref()).context("Failed to load configuration")?;
    let tick_interval = config.scheduler.tick_interval();

    let mut transceiver = Transceiver::new(
        config,
        CpalBackend::new(),
        Box::new(ToneModemFactory),
        Box::new(ConsoleSink),
    );

    for (title, direction) in [("Output", StreamDirection::Playback), ("Input", StreamDirection::Capture)] {
        println!("\n=== Available {} Devices ===", title);
        match transceiver.devices(direction) {
            Ok(devices) => {
                for device in &devices {
                    let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
                    println!("  #{}: {}{}", device.index, device.name, default_marker);
                }
            }
            Err(e) => println!("  (unavailable: {})", e),
        }
    }
    println!();

    transceiver.init().context("Failed to initialize audio devices")?;
    tracing::info!(
        "Ready, payload length {} bytes. Type a line to send it, Ctrl+C to quit",
        transceiver.config().modem.payload_length
    );

    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Shutting down...");
                break;
            }
            now = ticker.tick() => {
                transceiver.tick(now.into_std());
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let text = line.trim_end();
                    if !text.is_empty() {
                        if let Err(e) = transceiver.send(text.as_bytes()) {
                            tracing::warn!("Not sent: {}", e);
                        }
                    }
                }
                Ok(None) => {
                    stdin_open = false;
                    tracing::info!("Input closed, listening only");
                }
                Err(e) => {
                    stdin_open = false;
                    tracing::warn!("Failed to read input: {}", e);
                }
            }
        }
    }

    let stats = transceiver.stats();
    tracing::info!(
        "Frames decoded: {}, payloads: {}, decode failures: {}, backlog drops: {}",
        stats.frames_decoded,
        stats.payloads_received,
        stats.decode_failures,
        stats.backlog_drops
    );
    transceiver.shutdown();

    Ok(())
}
