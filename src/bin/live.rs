//! Live voice session
//!
//! Talks to the live API through the default microphone and speaker until
//! Ctrl+C or the server closes the session.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_audio_session::{
    audio::{list_devices, CpalBackend},
    config::AppConfig,
    network::WebSocketConnector,
    session::{SessionController, SessionEvent},
};

const USAGE: &str = "Usage: live [--config <path>] [--list-devices] [--init-config]";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    list_devices: bool,
    init_config: bool,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = Args::default();
        let mut iter = std::env::args().skip(1);

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    let path = iter.next().context("--config needs a path")?;
                    args.config = Some(PathBuf::from(path));
                }
                "--list-devices" => args.list_devices = true,
                "--init-config" => args.init_config = true,
                "-h" | "--help" => {
                    println!("{}", USAGE);
                    std::process::exit(0);
                }
                other => bail!("Unknown argument: {}\n{}", other, USAGE),
            }
        }
        Ok(args)
    }
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    ID: {}", device.id);
        if device.is_input {
            println!("    16 kHz capture: {}", device.supports_capture_rate);
        }
        if device.is_output {
            println!("    24 kHz playback: {}", device.supports_playback_rate);
        }
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse()?;
    let config = AppConfig::load(args.config.as_deref())?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.list_devices {
        print_devices();
        return Ok(());
    }

    if args.init_config {
        let path = args
            .config
            .or_else(AppConfig::default_path)
            .context("No config directory available")?;
        config.save(&path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    if config.session.api_key.is_none() {
        bail!("Set GEMINI_API_KEY (or API_KEY) to start a session");
    }

    tracing::info!("Starting live session with voice {}", config.session.voice);

    let (mut controller, handle) = SessionController::new(CpalBackend, WebSocketConnector::new(), config);
    let mut events = controller.subscribe();

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::TurnComplete(turn) => {
                    if !turn.user.is_empty() {
                        println!("You:   {}", turn.user.trim());
                    }
                    if !turn.model.is_empty() {
                        println!("Model: {}", turn.model.trim());
                    }
                }
                SessionEvent::Interrupted { .. } => println!("[interrupted]"),
                SessionEvent::Failed(e) => eprintln!("Session error: {}", e),
                _ => {}
            }
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, stopping");
            handle.stop();
        }
    });

    println!("Listening - press Ctrl+C to stop");
    let result = controller.run().await;

    drop(controller);
    let _ = printer.await;

    let summary = result?;
    tracing::info!(
        "Session {} ended after {}s: {:?}, {} chunks sent, {} segments played, {} dropped, {} interruptions",
        summary.session_id,
        summary.duration().num_seconds(),
        summary.end_reason,
        summary.chunks_sent,
        summary.segments_scheduled,
        summary.segments_dropped,
        summary.interruptions
    );

    if let Some(e) = summary.error() {
        return Err(e.clone().into());
    }
    Ok(())
}
