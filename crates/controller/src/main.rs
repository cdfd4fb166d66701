//! hid-controller
//!
//! Interactive controller for a microcontroller that presents itself as a USB
//! HID device. Sends menu commands, polls its sensors in the background and
//! reconnects automatically when the device is replugged.

use anyhow::{Context, Result};
use clap::Parser;
use common::{create_device_bridge, create_hotplug_channel, effective_level, setup_logging};
use controller::cli::{self, Menu, MenuCommand};
use controller::device::{
    CommandTransport, ConnectionManager, HidapiBackend, HotplugWatcher, spawn_device_worker,
};
use controller::{ControllerConfig, SensorPoller};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Observations buffered between the poller and the terminal
const OBSERVATION_QUEUE_DEPTH: usize = 16;

#[derive(Parser, Debug)]
#[command(name = "hid-controller")]
#[command(author, version, about = "Control a USB HID microcontroller from the terminal")]
#[command(long_about = "
Talks to a microcontroller that presents itself as a USB HID device using a
fixed 64-byte report protocol. Sends console, mouse and LED commands, reads
its temperature and humidity sensors, and polls them in the background.

EXAMPLES:
    # Run with default config
    hid-controller

    # Run with custom config
    hid-controller --config ~/controller.toml

    # List attached HID devices and exit
    hid-controller --list-devices

    # Same, as JSON
    hid-controller --list-devices --json

    # Interactive only, no background sensor polling
    hid-controller --no-poll

CONFIGURATION:
    The controller looks for its configuration in:
    1. Path specified with --config
    2. ~/.config/hid-controller/controller.toml
    3. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List HID devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print the device list as JSON (with --list-devices)
    #[arg(long, requires = "list_devices")]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Do not poll sensors in the background
    #[arg(long)]
    no_poll: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = ControllerConfig::default();
        let path = ControllerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = match args.config {
        Some(ref path) => {
            ControllerConfig::load(Some(path.clone())).context("Failed to load configuration")?
        }
        None => ControllerConfig::load_or_default(),
    };

    // CLI log level wins over the config value and its debug switch
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or_else(|| effective_level(&config.log_level, config.debug.enabled));
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("hid-controller v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);
    for line in config.summary_lines() {
        info!("  {}", line);
    }

    let backend = HidapiBackend::new().context("Failed to initialize HID API")?;
    let manager = Arc::new(ConnectionManager::new(config.identity(), Arc::new(backend)));

    if args.list_devices {
        return list_devices_mode(&manager, args.json);
    }

    // Hotplug feed -> manager; without libusb hotplug we still run
    let (hotplug_tx, hotplug_rx) = create_hotplug_channel();
    manager
        .spawn_hotplug_listener(hotplug_rx)
        .context("Failed to start hotplug listener")?;
    let watcher = match HotplugWatcher::start(config.identity(), hotplug_tx) {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!("Hotplug monitoring unavailable: {}", e);
            None
        }
    };

    match manager.connect() {
        Ok(()) => {
            let desc = manager.describe();
            println!(
                "Connected to {} ({}, {})",
                desc.identity, desc.product, desc.manufacturer
            );
        }
        Err(e) => {
            println!("{}", cli::render_connect_error(&e));
            println!("Waiting for the device; type 'list' to see attached devices.");
        }
    }

    let transport = Arc::new(CommandTransport::new(
        manager.clone(),
        config.transport_settings(),
    ));

    // Device worker thread (all blocking I/O for the menu happens there)
    let (bridge, worker) = create_device_bridge();
    let worker_handle =
        spawn_device_worker(worker, transport.clone()).context("Failed to spawn device worker")?;

    let (obs_tx, obs_rx) = async_channel::bounded(OBSERVATION_QUEUE_DEPTH);
    let poller = if args.no_poll {
        info!("Background sensor polling disabled by --no-poll");
        None
    } else {
        Some(SensorPoller::new(transport, config.poller_settings(), obs_tx).start())
    };
    let printer = tokio::spawn(async move {
        while let Ok(observation) = obs_rx.recv().await {
            println!("{}", cli::render_observation(&observation));
        }
    });

    let menu = Menu::new(bridge.clone(), config.default_led());
    let result = run_interactive(&menu).await;

    // Cleanup
    info!("Shutting down...");
    if let Some(poller) = poller {
        poller.shutdown().await;
    }
    printer.abort();

    if let Err(e) = bridge.shutdown().await {
        error!("Error shutting down device worker: {:#}", e);
    }
    if let Err(e) = worker_handle.join() {
        error!("Device worker thread panicked: {:?}", e);
    }

    drop(watcher);
    manager.close();

    result
}

/// Print HID devices and exit
fn list_devices_mode(manager: &ConnectionManager, json: bool) -> Result<()> {
    let devices = manager
        .list_devices()
        .context("Failed to enumerate HID devices")?;

    if json {
        let out = serde_json::to_string_pretty(&devices).context("Failed to encode JSON")?;
        println!("{}", out);
    } else {
        for line in cli::render_device_list(&devices) {
            println!("{}", line);
        }
    }
    Ok(())
}

/// Read menu commands from stdin until exit, EOF or Ctrl+C
async fn run_interactive(menu: &Menu) -> Result<()> {
    for line in cli::help_lines() {
        println!("{}", line);
    }

    let lines = spawn_stdin_reader().context("Failed to spawn stdin reader")?;
    loop {
        print!("\n> ");
        std::io::stdout().flush().context("Failed to flush stdout")?;

        let input = tokio::select! {
            line = lines.recv() => line.ok(),
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C");
                None
            }
        };
        let Some(input) = input else {
            break;
        };

        let command = match cli::parse_command(&input) {
            Ok(Some(MenuCommand::Exit)) => break,
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        let output = menu
            .execute(command)
            .await
            .context("Device worker is gone")?;
        for line in output {
            println!("{}", line);
        }
    }

    Ok(())
}

/// Blocking stdin reads on their own thread
///
/// A read pending inside the runtime would hold up shutdown until the next
/// line arrives; this thread is simply abandoned at exit.
fn spawn_stdin_reader() -> std::io::Result<async_channel::Receiver<String>> {
    let (tx, rx) = async_channel::bounded(1);
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send_blocking(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}
