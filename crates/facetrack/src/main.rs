use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facetrack_core::{DetectionRequest, OnnxFaceAnalyzer, OverlayOptions};
use facetrack_hw::{Camera, FrameSource};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod config;
mod console;
mod engine;
mod frame_loop;
mod recorder;
mod store;
mod studio;
mod surface;

use config::Config;
use console::{ConsoleCommand, ConsoleEvent, Reply};
use store::RecordingStore;
use studio::Studio;
use surface::Surface;

/// How often the console checks whether the frame loop is still alive.
const FRAME_LOOP_WATCHDOG: std::time::Duration = std::time::Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "facetrack", about = "Live webcam face tracking with overlays and recording")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live view with the control console (default)
    Run,
    /// List video capture devices
    Devices,
    /// Capture one frame and print the detected faces as JSON
    Detect {
        /// Include five-point landmarks
        #[arg(long)]
        landmarks: bool,
        /// Include expression probabilities
        #[arg(long)]
        expressions: bool,
        /// Also write the frame with its overlay to this image file
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Write the saved recording to a file
    Export {
        /// Destination file
        path: PathBuf,
    },
    /// Remove the saved recording
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("no video capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(())
        }
        Commands::Detect {
            landmarks,
            expressions,
            snapshot,
        } => detect(config, OverlayOptions { landmarks, expressions }, snapshot).await,
        Commands::Export { path } => {
            let store = RecordingStore::open(&config.db_path)?;
            let stored = store.load()?.context("no saved recording")?;
            std::fs::write(&path, stored.asset.bytes())
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "wrote {} ({} bytes, saved {})",
                path.display(),
                stored.asset.len(),
                stored.saved_at.to_rfc3339()
            );
            Ok(())
        }
        Commands::Clear => {
            let removed = RecordingStore::open(&config.db_path)?.clear()?;
            println!("{}", if removed { "saved recording removed" } else { "nothing saved" });
            Ok(())
        }
    }
}

fn load_analyzer(config: &Config) -> Result<OnnxFaceAnalyzer> {
    OnnxFaceAnalyzer::load(&config.detector_model_path(), &config.expression_model_path())
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))
}

async fn run(config: Config) -> Result<()> {
    tracing::info!(device = %config.camera_device, "facetrack starting");

    let mut studio = Studio::open(&config)?;
    let engine = engine::spawn_engine(load_analyzer(&config)?)?;

    let stop = Arc::new(AtomicBool::new(false));
    let device = config.camera_device.clone();
    let warmup = config.warmup_frames;
    let frames = frame_loop::spawn_frame_loop(
        move || Camera::open(&device)?.into_stream(warmup),
        engine.clone(),
        studio.surface(),
        studio.toggles(),
        studio.recorder(),
        config.frame_interval(),
        stop.clone(),
    )
    .with_context(|| format!("failed to start camera {}", config.camera_device))?;

    let (width, height) = frames.source_size();
    println!("facetrack ready, camera at {width}x{height}; type 'help' for commands");
    if let Some(asset) = studio.preview() {
        println!("restored saved recording {} ({} bytes)", asset.reference, asset.len());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut watchdog = tokio::time::interval(FRAME_LOOP_WATCHDOG);
    loop {
        let line = match console::next_event(&mut lines, &mut watchdog, || frames.is_finished()).await? {
            ConsoleEvent::Line(line) => line,
            ConsoleEvent::Closed | ConsoleEvent::Interrupted => break,
            ConsoleEvent::FrameLoopStopped => {
                println!("camera loop has stopped; exiting");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match console::execute(&mut studio, Some(&engine), command) {
            Ok(Reply::Message(message)) => println!("{message}"),
            Ok(Reply::Quit) => break,
            Err(e) => println!("error: {e}"),
        }
    }

    tracing::info!("facetrack shutting down");
    stop.store(true, Ordering::Relaxed);
    match frames.join() {
        Ok(Ok(count)) => tracing::debug!(frames = count, "frame loop joined"),
        Ok(Err(e)) => tracing::error!(error = %e, "frame loop ended with error"),
        Err(_) => tracing::error!("frame loop panicked"),
    }
    Ok(())
}

async fn detect(config: Config, options: OverlayOptions, snapshot: Option<PathBuf>) -> Result<()> {
    let request: DetectionRequest = options.request();
    let engine = engine::spawn_engine(load_analyzer(&config)?)?;

    let camera = Camera::open(&config.camera_device)?;
    let frame = camera.into_stream(config.warmup_frames)?.next_frame()?;
    let result = engine.analyze(frame.clone(), request).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(path) = snapshot {
        let mut surface = Surface::new(frame.width, frame.height);
        surface.draw_frame(&frame);
        if let Err(e) = surface.draw_overlay(&result, options) {
            tracing::warn!(error = %e, "overlay incomplete");
        }
        surface
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("wrote {}", path.display());
    }
    Ok(())
}
