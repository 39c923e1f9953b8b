//! camctl command-line tool
//!
//! Lists serial ports, exercises a camera with a sweep pattern and runs
//! one-shot commands.
//!
//! ```bash
//! camctl list-ports
//! camctl sweep -p canon /dev/ttyUSB0
//! camctl move -p sony /dev/ttyUSB0 -- -20 5
//! RUST_LOG=camctl_core=trace camctl query -p pana /dev/ttyS0
//! ```

use anyhow::{Context, Result};
use camctl_core::actor::ControllerHandle;
use camctl_core::config::ControllerConfig;
use camctl_core::dialect::{DialectKind, RunDirection};
use camctl_core::protocol::{list_ports, ProtocolError};
use camctl_core::Controller;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "camctl", version)]
#[command(about = "Drive pan-tilt-zoom cameras over a serial line", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON controller configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Target {
    /// Camera dialect: canon, sony, pana or visca
    #[arg(short, long, default_value = "visca")]
    protocol: DialectKind,

    /// Serial device, e.g. /dev/ttyUSB0
    device: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ZoomDirection {
    Tele,
    Wide,
    Stop,
}

impl ZoomDirection {
    fn z(self) -> f64 {
        match self {
            ZoomDirection::Tele => -1.0,
            ZoomDirection::Wide => 1.0,
            ZoomDirection::Stop => 0.0,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports
    ListPorts,

    /// Open the camera and print what it reported
    Info {
        #[command(flatten)]
        target: Target,
    },

    /// Drive the head through a sin/cos pattern
    Sweep {
        #[command(flatten)]
        target: Target,

        /// Number of moves
        #[arg(long, default_value_t = 100)]
        steps: u32,

        /// Fraction of each axis range to cover, 0..1
        #[arg(long, default_value_t = 0.8)]
        amplitude: f64,

        /// Speed in degrees per second
        #[arg(long, default_value_t = 20.0)]
        speed: f64,

        /// Pause between moves
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
    },

    /// Move to an absolute position in degrees
    Move {
        #[command(flatten)]
        target: Target,

        #[arg(allow_negative_numbers = true)]
        pan: f64,

        #[arg(allow_negative_numbers = true)]
        tilt: f64,

        /// Speed in degrees per second
        #[arg(long, default_value_t = 20.0)]
        speed: f64,
    },

    /// Drive the zoom
    Zoom {
        #[command(flatten)]
        target: Target,

        #[arg(value_enum)]
        direction: ZoomDirection,

        /// Zoom speed, 0..7
        #[arg(long, default_value_t = 3)]
        speed: u8,

        /// Stop again after this long
        #[arg(long)]
        duration_ms: Option<u64>,
    },

    /// Zoom to a position, 0 wide to 1 tele
    ZoomTo {
        #[command(flatten)]
        target: Target,

        fraction: f64,

        /// Zoom speed, 0..7
        #[arg(long, default_value_t = 3)]
        speed: u8,
    },

    /// Print the head position
    Query {
        #[command(flatten)]
        target: Target,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run continuously in one direction, then stop
    Run {
        #[command(flatten)]
        target: Target,

        /// left, left-top, left-bottom, right, right-top, right-bottom, top or bottom
        direction: RunDirection,

        /// Speed in degrees per second
        #[arg(long, default_value_t = 10.0)]
        speed: f64,

        /// How long to keep moving
        #[arg(long, default_value_t = 1000)]
        duration_ms: u64,
    },
}

impl Commands {
    fn target(&self) -> Option<&Target> {
        match self {
            Commands::ListPorts => None,
            Commands::Info { target }
            | Commands::Sweep { target, .. }
            | Commands::Move { target, .. }
            | Commands::Zoom { target, .. }
            | Commands::ZoomTo { target, .. }
            | Commands::Query { target, .. }
            | Commands::Run { target, .. } => Some(target),
        }
    }
}

/// Cancel the camera's in-flight read on Ctrl+C
fn spawn_ctrl_c_canceller(camera: &ControllerHandle) {
    let token = camera.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            token.cancel();
        }
    });
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<ControllerConfig> {
    match path {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(ControllerConfig::default()),
    }
}

async fn connect(target: &Target, config: ControllerConfig) -> Result<ControllerHandle> {
    let controller = Controller::create_with_config(target.protocol.name(), config)?;
    let camera = ControllerHandle::spawn(controller)?;
    spawn_ctrl_c_canceller(&camera);
    camera
        .open(&target.device)
        .await
        .with_context(|| format!("can't open {} as {}", target.device, target.protocol))?;
    Ok(camera)
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("no serial ports found");
        return;
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  [{:04x}:{:04x}] {}",
                port.name,
                vid,
                pid,
                port.product.as_deref().unwrap_or("")
            ),
            _ => println!("{}", port.name),
        }
    }
}

async fn print_info(camera: &ControllerHandle) -> Result<()> {
    let Some(cal) = camera.calibration().await? else {
        return Ok(());
    };
    println!("dialect:     {}", camera.kind());
    println!(
        "device:      {}",
        cal.device_info.as_deref().unwrap_or("(no identification)")
    );
    println!("pan:         {:.2} .. {:.2} deg", cal.pan.min, cal.pan.max);
    println!("tilt:        {:.2} .. {:.2} deg", cal.tilt.min, cal.tilt.max);
    println!(
        "pan speed:   {:.2} .. {:.2} deg/s",
        cal.pan_speed.min, cal.pan_speed.max
    );
    println!(
        "tilt speed:  {:.2} .. {:.2} deg/s",
        cal.tilt_speed.min, cal.tilt_speed.max
    );
    println!("zoom steps:  {}", cal.zoom.native_max - cal.zoom.native_min);
    if cal.used_defaults() {
        println!("(some ranges taken from the built-in table)");
    }
    Ok(())
}

async fn sweep(
    camera: &ControllerHandle,
    steps: u32,
    amplitude: f64,
    speed: f64,
    interval: Duration,
) -> Result<()> {
    let cal = camera
        .calibration()
        .await?
        .context("camera has no calibration")?;
    let amplitude = amplitude.clamp(0.0, 1.0);
    let token = camera.cancellation_token();

    for n in 0..steps {
        let x = (n as f64).sin() * amplitude;
        let y = (n as f64).cos() * amplitude;
        let pan = x * if x < 0.0 { -cal.pan.min } else { cal.pan.max };
        let tilt = y * if y < 0.0 { -cal.tilt.min } else { cal.tilt.max };

        match camera.move_to(speed, pan, speed, tilt).await {
            Ok(()) => info!(step = n, pan = %format!("{:.1}", pan), tilt = %format!("{:.1}", tilt), "moved"),
            Err(ProtocolError::Cancelled) => break,
            Err(e) => warn!(step = n, "can't move to ({:.1}, {:.1}): {}", pan, tilt, e),
        }
        if token.is_cancelled() {
            break;
        }
        tokio::time::sleep(interval).await;
    }
    Ok(())
}

/// Wait `duration`, or less if Ctrl+C arrives first
async fn pause(camera: &ControllerHandle, duration: Duration) {
    let token = camera.cancellation_token();
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = token.cancelled() => {}
    }
}

async fn execute(camera: &mut ControllerHandle, command: Commands) -> Result<()> {
    match command {
        Commands::ListPorts => {}
        Commands::Info { .. } => print_info(camera).await?,
        Commands::Sweep {
            steps,
            amplitude,
            speed,
            interval_ms,
            ..
        } => {
            sweep(
                camera,
                steps,
                amplitude,
                speed,
                Duration::from_millis(interval_ms),
            )
            .await?
        }
        Commands::Move {
            pan, tilt, speed, ..
        } => camera.move_to(speed, pan, speed, tilt).await?,
        Commands::Zoom {
            direction,
            speed,
            duration_ms,
            ..
        } => {
            camera.zoom(speed, direction.z()).await?;
            if let Some(ms) = duration_ms.filter(|_| direction != ZoomDirection::Stop) {
                pause(camera, Duration::from_millis(ms)).await;
                // the stop has to go out even after Ctrl+C
                camera.reset_cancellation().await?;
                camera.zoom(0, 0.0).await?;
            }
        }
        Commands::ZoomTo {
            fraction, speed, ..
        } => camera.zoom_to(speed, fraction).await?,
        Commands::Query { json, .. } => {
            let pos = camera.query().await?;
            if json {
                println!("{}", serde_json::to_string(&pos)?);
            } else {
                println!("pan {:.2} tilt {:.2}", pos.pan, pos.tilt);
            }
        }
        Commands::Run {
            direction,
            speed,
            duration_ms,
            ..
        } => {
            let started = camera.run(speed, speed, direction, true).await;
            if started.is_ok() {
                pause(camera, Duration::from_millis(duration_ms)).await;
            }
            camera.reset_cancellation().await?;
            camera.run(speed, speed, direction, false).await?;
            started?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let Some(target) = cli.command.target() else {
        print_ports();
        return Ok(());
    };

    let config = load_config(cli.config.as_ref())?;
    let mut camera = connect(target, config).await?;
    let result = execute(&mut camera, cli.command).await;
    camera.shutdown().await?;
    result
}
