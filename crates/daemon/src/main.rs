//! suidi-dmx
//!
//! Streams DMX512 universes to SUIDI USB-DMX interfaces.

use anyhow::{Context, Result, bail};
use clap::Parser;
use common::{OutputBridge, OutputCommand, OutputEvent, create_output_bridge, setup_logging};
use daemon::usb::{RusbBus, is_valid_frequency, spawn_output_worker};
use daemon::{ConfigFrequencyStore, DaemonConfig, FrequencyStore};
use protocol::{DMX_CHANNELS, OutputSummary};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "suidi-dmx")]
#[command(author, version, about = "Stream DMX512 to SUIDI USB-DMX interfaces")]
#[command(long_about = "
Drives SUIDI USB-DMX interfaces. Every bulk-OUT endpoint of a device is one
DMX universe; each open device is streamed from its own pacing thread.

EXAMPLES:
    # Open every universe and hold all channels at zero
    suidi-dmx

    # Full output on every channel at 44 frames per second
    suidi-dmx --level 255 --frequency 44

    # List outputs without streaming
    suidi-dmx --list-devices --json

CONFIGURATION:
    The daemon looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/suidi-dmx/config.toml
    3. /etc/suidi-dmx/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List outputs and exit
    #[arg(long)]
    list_devices: bool,

    /// Print the output list as JSON
    #[arg(long, requires = "list_devices")]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Persist a new DMX frame frequency in Hz
    #[arg(short, long, value_name = "HZ")]
    frequency: Option<f64>,

    /// Value written to every channel of every output
    #[arg(long, value_name = "0-255", default_value_t = 0)]
    level: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = DaemonConfig::default();
        let path = DaemonConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    // Load configuration first (to get log level from config if not specified)
    let config = if let Some(ref path) = args.config {
        DaemonConfig::load(Some(path.as_str())).context("Failed to load configuration")?
    } else {
        DaemonConfig::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("suidi-dmx v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let store_path = DaemonConfig::locate(args.config.as_deref())
        .unwrap_or_else(DaemonConfig::default_path);
    let store = Arc::new(ConfigFrequencyStore::new(store_path));

    if let Some(hz) = args.frequency {
        if !is_valid_frequency(hz) {
            bail!("Invalid frequency {} Hz, must be between 1 and 1000", hz);
        }
        store
            .store(hz)
            .context("Failed to persist frame frequency")?;
        info!("Frame frequency set to {} Hz", hz);
    }

    let bus = RusbBus::new().context("Failed to initialise libusb")?;

    // Registry and outputs live on a dedicated thread
    let (bridge, worker) = create_output_bridge();
    let worker_handle = spawn_output_worker(worker, bus, config.session_config(store))
        .context("Failed to spawn output worker thread")?;

    let result = if args.list_devices {
        list_devices_mode(&bridge, args.json).await
    } else {
        run_output(&config, &bridge, args.level).await
    };

    info!("Shutting down output worker...");
    if let Err(e) = bridge.send_command(OutputCommand::Shutdown).await {
        error!("Error shutting down output worker: {:#}", e);
    }

    // Wait for the worker to close every device
    if let Err(e) = worker_handle.join() {
        error!("Output worker thread panicked: {:?}", e);
    }

    result
}

/// Send a command and wait for its response
async fn request<T>(
    bridge: &OutputBridge,
    command: impl FnOnce(oneshot::Sender<T>) -> OutputCommand,
) -> Result<T> {
    let (tx, rx) = oneshot::channel();
    bridge
        .send_command(command(tx))
        .await
        .context("Failed to send command to output worker")?;
    rx.await.context("Output worker dropped the request")
}

/// List outputs and exit
async fn list_devices_mode(bridge: &OutputBridge, json: bool) -> Result<()> {
    request(bridge, |response| OutputCommand::Rescan { response }).await?;
    let outputs = request(bridge, |response| OutputCommand::ListOutputs { response }).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
        return Ok(());
    }

    print_outputs(&outputs);
    Ok(())
}

fn print_outputs(outputs: &[OutputSummary]) {
    if outputs.is_empty() {
        println!("No SUIDI devices found.");
        return;
    }

    println!("Found {} output(s):\n", outputs.len());
    for output in outputs {
        println!("  [{}] {}", output.index, output.name);
        for line in output.info.lines() {
            println!("      {}", line);
        }
        println!();
    }
}

/// Open every output and keep streaming until Ctrl+C
async fn run_output(config: &DaemonConfig, bridge: &OutputBridge, level: u8) -> Result<()> {
    let changed = request(bridge, |response| OutputCommand::Rescan { response }).await?;
    if !changed {
        warn!("No SUIDI devices found, waiting for one to be plugged in");
    }

    let period = config.daemon.rescan_interval_secs;
    let mut ticker = tokio::time::interval(Duration::from_secs(period.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Press Ctrl+C to stop");

    loop {
        tokio::select! {
            result = &mut shutdown => {
                match result {
                    Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                    Err(e) => error!("Error waiting for Ctrl+C: {}", e),
                }
                break;
            }

            _ = ticker.tick(), if period > 0 => {
                request(bridge, |response| OutputCommand::Rescan { response }).await?;
            }

            event = bridge.recv_event() => {
                match event {
                    Ok(OutputEvent::ConfigurationChanged { outputs }) => {
                        info!("Outputs changed: {:?}", outputs);
                        open_outputs(bridge, outputs.len(), level).await?;
                    }
                    Err(e) => {
                        error!("Output worker stopped: {:#}", e);
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Write `level` to every channel of the first `count` outputs and open them
async fn open_outputs(bridge: &OutputBridge, count: usize, level: u8) -> Result<()> {
    for output in 0..count as u32 {
        bridge
            .send_command(OutputCommand::WriteUniverse {
                output,
                data: vec![level; DMX_CHANNELS],
            })
            .await
            .context("Failed to send channel data")?;

        let opened =
            request(bridge, |response| OutputCommand::OpenOutput { output, response }).await?;
        if opened {
            info!("Output {} streaming", output);
        } else {
            warn!("Output {} could not be opened", output);
        }
    }
    Ok(())
}
