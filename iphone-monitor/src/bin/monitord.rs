//! iPhone monitor daemon.
//!
//! Connects to the microcontroller, verifies it with the startup handshake,
//! and then relays iPhone presence changes until SIGINT or SIGTERM.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal::unix::{self, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use iphone_monitor::config::Config;
use iphone_monitor::device::DeviceProbe;
use iphone_monitor::handshake;
use iphone_monitor::runner::MonitorContext;
use iphone_monitor::serial;
use iphone_monitor::tracing::{self, prelude::*};

/// Relay iPhone USB presence to a microcontroller over serial
#[derive(Parser, Debug)]
#[command(name = "iphone-monitord")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port of the microcontroller (overrides config and environment)
    #[arg(short, long)]
    port: Option<String>,

    /// Probe the phone once before monitoring instead of assuming it is present
    #[arg(long)]
    probe_on_start: bool,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        if let Some(port) = &self.port {
            config.serial.port = port.clone();
        }
        if self.probe_on_start {
            config.monitor.probe_on_start = true;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;
    tracing::init_journald_or_stdout(&config.log_level.0);
    info!("Starting iPhone Monitor...");

    serial::log_available_ports();
    if args.list_ports {
        return Ok(());
    }

    let running = CancellationToken::new();
    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    let stop = running.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {},
            _ = sigterm.recv() => {},
        }
        trace!("Stop signal received.");
        stop.cancel();
    });

    let probe = DeviceProbe::system();

    // Dropping the connect future on shutdown releases the port.
    let connecting = handshake::connect(&config.serial, &config.handshake);
    let link = tokio::select! {
        result = connecting => match result {
            Ok(link) => link,
            Err(e) => {
                error!("Error: {}", e);
                return Err(e.into());
            }
        },
        _ = running.cancelled() => {
            info!("Stopped before monitoring started.");
            return Ok(());
        }
    };

    let mut monitor =
        MonitorContext::new(probe, link, config.monitor.clone()).await;

    let tracker = TaskTracker::new();
    tracker.spawn({
        let running = running.clone();
        async move { monitor.run(running).await }
    });
    tracker.close();
    info!("Started.");

    tracker.wait().await;
    info!("Exiting.");
    Ok(())
}
