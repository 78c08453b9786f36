//! qrscan: report QR codes seen by a V4L2 camera

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use qrscan::capture::{CaptureSource, V4l2Capture};
use qrscan::pipeline::{Scanner, WriterSink};
use qrscan::recognizer::QrRecognizer;
use qrscan::utils::{parse_resolution, Resolution};
use qrscan::Config;

#[derive(Parser, Debug)]
#[command(name = "qrscan")]
#[command(about = "Scan QR codes from a video device and print each new payload")]
#[command(version, long_version = concat!(env!("CARGO_PKG_VERSION"), " (recognizer: rqrr)"))]
struct Cli {
    /// Camera device path
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Video dimensions, e.g. 640x480
    #[arg(short, long, value_name = "WxH", value_parser = parse_resolution)]
    size: Option<Resolution>,

    /// Seconds to suppress repeats of a code (0 reports every sighting)
    #[arg(short = 'p', long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Show version, ECC level, mask and type for detected codes
    #[arg(short, long)]
    verbose: bool,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(device) = &self.device {
            config.capture.device = device.clone();
        }
        if let Some(size) = self.size {
            config.capture.set_resolution(size);
        }
        if let Some(timeout) = self.timeout {
            config.scanner.dedup_timeout_secs = timeout;
        }
        if self.verbose {
            config.scanner.verbose = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries nothing but reports. `-v` only
    // affects report detail; per-frame logs need RUST_LOG=qrscan=trace.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qrscan=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_writer(std::io::stderr)
        .init();

    info!("qrscan {} launching", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    let stop = Arc::new(AtomicBool::new(false));
    tokio::spawn(watch_interrupts(stop.clone()));

    let frames = tokio::task::spawn_blocking(move || scan(&config, &stop)).await??;

    info!(frames, "qrscan shutting down");
    Ok(())
}

/// First Ctrl-C stops after the current frame, a second one exits at once
async fn watch_interrupts(stop: Arc<AtomicBool>) {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("Unable to listen for Ctrl-C");
        return;
    }
    info!("Interrupt received, stopping after the current frame");
    stop.store(true, Ordering::Relaxed);

    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Second interrupt, exiting immediately");
        std::process::exit(130);
    }
}

fn scan(config: &Config, stop: &AtomicBool) -> Result<u64> {
    info!("Using capture device: {}", config.capture.device.display());
    let capture = V4l2Capture::open(&config.capture)?;

    // Work at whatever size the driver actually agreed to
    let params = capture.params();
    params.ensure_supported()?;
    let recognizer = QrRecognizer::new(params.width as usize, params.height as usize);
    info!(
        backend = QrRecognizer::backend(),
        width = params.width,
        height = params.height,
        "Recognizer ready"
    );

    let sink = WriterSink::stdout(config.scanner.verbose);
    let mut scanner = Scanner::new(capture, recognizer, sink, &config.scanner);
    Ok(scanner.run(stop)?)
}
