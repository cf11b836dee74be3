use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use seek_core::{
    CameraEvent, CameraObserver, Colormap, DeviceConfig, DeviceDescriptor, DeviceSession,
    NusbTransport, ProcessedFrame, ShutterMode, TracingObserver,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Seek Thermal camera capture tool", long_about = None)]
struct Args {
    /// Device configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to this file and continue
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Stop after this many image frames (0 = until disconnect)
    #[arg(short, long, default_value_t = 0)]
    frames: u64,

    /// Directory for PNG snapshots
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Save every Nth frame when --output is set
    #[arg(long, default_value_t = 1)]
    every: u64,

    /// Colormap name or OpenCV id
    #[arg(long)]
    colormap: Option<Colormap>,

    /// Output scale factor
    #[arg(long)]
    scale: Option<f32>,

    /// Use the thresholds from the configuration instead of auto exposure
    #[arg(long)]
    lock_exposure: bool,

    /// Start with the shutter in manual mode
    #[arg(long)]
    manual_shutter: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

enum Signal {
    FrameLimit,
    Disconnected,
}

/// Logs frame rate, writes snapshots and reports when capture should end.
struct CaptureObserver {
    output: Option<PathBuf>,
    every: u64,
    limit: u64,
    count: AtomicU64,
    window: Mutex<(Instant, u64)>,
    done: Mutex<Sender<Signal>>,
}

impl CaptureObserver {
    fn signal(&self, signal: Signal) {
        let tx = self.done.lock().unwrap_or_else(|p| p.into_inner());
        let _ = tx.send(signal);
    }

    fn log_rate(&self) {
        let mut window = self.window.lock().unwrap_or_else(|p| p.into_inner());
        window.1 += 1;
        let elapsed = window.0.elapsed();
        if elapsed.as_secs_f32() >= 1.0 {
            let fps = window.1 as f32 / elapsed.as_secs_f32();
            info!(fps = %format!("{:.1}", fps), "Frame rate");
            *window = (Instant::now(), 0);
        }
    }

    fn save(&self, n: u64, frame: &ProcessedFrame) {
        let Some(dir) = &self.output else {
            return;
        };
        if n % self.every.max(1) != 0 {
            return;
        }
        let path = dir.join(format!("frame_{:08}.png", frame.sequence));
        match frame.image.save(&path) {
            Ok(()) => info!(path = %path.display(), "Snapshot saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to save snapshot"),
        }
    }
}

impl CameraObserver for CaptureObserver {
    fn on_connect(&self, device: &DeviceDescriptor) {
        TracingObserver.on_connect(device);
    }

    fn on_disconnect(&self, device: &DeviceDescriptor) {
        TracingObserver.on_disconnect(device);
        self.signal(Signal::Disconnected);
    }

    fn on_frame(&self, device: &DeviceDescriptor, frame: &ProcessedFrame) {
        TracingObserver.on_frame(device, frame);
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        self.log_rate();
        self.save(n, frame);
        if self.limit > 0 && n == self.limit {
            self.signal(Signal::FrameLimit);
        }
    }

    fn on_event(&self, event: &CameraEvent) {
        TracingObserver.on_event(event);
    }
}

fn load_config(args: &Args) -> Result<DeviceConfig> {
    let mut config = match &args.config {
        Some(path) => DeviceConfig::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => DeviceConfig::default(),
    };
    if let Some(colormap) = args.colormap {
        config.colormap = colormap;
    }
    if let Some(scale) = args.scale {
        config.scale_factor = scale;
    }
    if args.lock_exposure {
        config.lock_exposure = true;
    }
    if args.manual_shutter {
        config.shutter_mode = ShutterMode::Manual;
    }
    if let Some(path) = &args.save_config {
        config
            .save_to_file(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Configuration saved");
    }
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    if let Some(dir) = &args.output {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let transport = NusbTransport::open()?;
    let (tx, rx) = mpsc::channel();
    let observer = Arc::new(CaptureObserver {
        output: args.output.clone(),
        every: args.every,
        limit: args.frames,
        count: AtomicU64::new(0),
        window: Mutex::new((Instant::now(), 0)),
        done: Mutex::new(tx),
    });

    let mut session = DeviceSession::with_observer(transport, config, Arc::clone(&observer))?;
    session.start()?;

    match rx.recv() {
        Ok(Signal::FrameLimit) => info!(frames = args.frames, "Frame limit reached"),
        Ok(Signal::Disconnected) | Err(_) => warn!("Camera disconnected"),
    }
    session.stop();
    info!(
        frames = observer.count.load(Ordering::Relaxed),
        "Capture finished"
    );
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting seekcam (nusb backend)...");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
