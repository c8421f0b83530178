use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use mercury::io::tcp::{spawn_control_surface, spawn_data_surface};
use mercury::settings::Settings;
use mercury::utils::logging::init_logging;
use mercury::Modem;

/// Software-defined HF modem daemon.
///
/// Exposes the line-oriented control surface on the base TCP port and the
/// opaque data surface on base + 1. Audio flows through the in-process
/// capture/playback rings; an external adapter moves samples between them
/// and the sound hardware.
#[derive(Parser)]
#[command(name = "mercury", version, about)]
struct Args {
    /// JSON settings file; CLI flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Local callsign.
    #[arg(long)]
    mycall: Option<String>,

    /// Start in listening (auto-answer) state.
    #[arg(long)]
    listen: bool,

    /// Initial physical-layer mode, 0 (robust) to 6 (fast).
    #[arg(long)]
    mode: Option<u8>,

    /// Audio bandwidth in Hz: 2300 or 2500.
    #[arg(long)]
    bandwidth: Option<u32>,

    /// Base TCP port (control; data is base + 1).
    #[arg(long)]
    port: Option<u16>,

    /// Disable the adaptive gear shift.
    #[arg(long)]
    no_gear_shift: bool,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::load(path).context("loading settings")?,
        None => Settings::default(),
    };
    if let Some(mycall) = args.mycall {
        settings.my_call_sign = mycall;
    }
    if args.listen {
        settings.listen = true;
    }
    if let Some(mode) = args.mode {
        settings.initial_mode = mode;
    }
    if let Some(bandwidth) = args.bandwidth {
        settings.bandwidth_hz = bandwidth;
    }
    if let Some(port) = args.port {
        settings.tcp_base_port = port;
    }
    if args.no_gear_shift {
        settings.gear_shift_on = false;
    }

    let bandwidth = settings.bandwidth()?;
    let initial_mode = settings.initial_mode()?;

    let (modem, handles) = Modem::start(
        settings.telecom_config(),
        bandwidth,
        initial_mode,
        settings.arq_config(),
    )
    .context("starting modem")?;

    // Seed the session state from the settings file.
    if !settings.my_call_sign.is_empty() {
        let _ = handles
            .commands
            .send(format!("MYCALL {}", settings.my_call_sign));
    }
    if settings.listen {
        let _ = handles.commands.send("LISTEN ON".to_string());
    }

    let tcp_shutdown = Arc::new(AtomicBool::new(false));
    let control = spawn_control_surface(
        settings.tcp_base_port,
        handles.commands.clone(),
        handles.ctl_events,
        tcp_shutdown.clone(),
    )
    .context("control surface")?;
    let data = spawn_data_surface(
        settings.tcp_base_port + 1,
        handles.data_in.clone(),
        handles.data_out,
        tcp_shutdown.clone(),
    )
    .context("data surface")?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        })
        .context("installing signal handler")?;
    }

    info!(
        port = settings.tcp_base_port,
        "running; press Ctrl-C to stop"
    );
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    tcp_shutdown.store(true, Ordering::Relaxed);
    modem.stop();
    let _ = control.join();
    let _ = data.join();
    Ok(())
}
