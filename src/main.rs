//! Scan-engine binary: reads barcodes from a V4L2 camera and prints them.

use std::path::PathBuf;
use std::thread;

use anyhow::{bail, Context};
use clap::Parser;
use scan_engine::{
    CaptureSource, FrameSource, MapConfig, QrDecoder, ScanConfig, ScanEngine, ScanEvent,
    SourceFactory, V4L2Device,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Live barcode scanner
#[derive(Parser, Debug)]
#[command(name = "scan-engine", version, about)]
struct Cli {
    /// Camera index (/dev/videoN)
    #[arg(short, long, default_value_t = 0)]
    device: u32,

    /// JSON file with `scan.*` and `camera.*` settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Exit after the first successful read
    #[arg(long)]
    once: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            let source = MapConfig::from_json_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            ScanConfig::from_source(&source)
        }
        None => ScanConfig::default(),
    };
    info!(device = cli.device, formats = %config.allowed_formats(), "Starting scanner");

    let index = cli.device;
    let factory: SourceFactory = Box::new(move || -> Box<dyn FrameSource> {
        Box::new(CaptureSource::new(move || V4L2Device::open(index)))
    });

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let cooloff = config.success_cooloff;
    let mut engine = ScanEngine::spawn(config, factory, Box::new(QrDecoder::new()), event_tx)
        .context("failed to start scan engine")?;
    engine.request_start()?;

    loop {
        match event_rx.recv().context("scan engine stopped unexpectedly")? {
            ScanEvent::Succeeded(result) => {
                info!(
                    format = %result.format,
                    width = result.frame_size.0,
                    height = result.frame_size.1,
                    "Scan succeeded"
                );
                println!("{}\t{}", result.format, result.text);
                if cli.once {
                    break;
                }
                thread::sleep(cooloff);
                engine.request_start()?;
            }
            ScanEvent::TimedOut { consecutive } => {
                info!(consecutive, "No barcode found; scanning again");
                engine.request_start()?;
            }
            ScanEvent::CameraError(reason) => warn!(%reason, "Camera error"),
            ScanEvent::CameraUnavailable(reason) => {
                engine.shutdown();
                bail!("camera unavailable: {reason}");
            }
        }
    }

    engine.shutdown();
    Ok(())
}
