//! hid-host
//!
//! Command-line front end for the HID host: list devices, read or write a
//! single report, or watch hotplug and lifecycle events.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::setup_logging;
use host::config::{self, HostConfig};
use host::{HidHost, MockDevice, MockPlatform, PermissionMode, RusbPlatform};
use protocol::{DeviceDescriptor, EnumerateResult, ReadResult};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

/// Path of the in-memory device used by `--mock`
const MOCK_PATH: &str = "usb:1-1";

#[derive(Parser, Debug)]
#[command(name = "hid-host")]
#[command(author, version, about = "HID host - talk to USB HID devices")]
#[command(long_about = "
Enumerate USB HID devices and exchange input/output reports with them.

EXAMPLES:
    # List visible devices
    hid-host --list-devices

    # Same, as JSON
    hid-host --list-devices --json

    # Read one input report (waits up to 500 ms)
    hid-host --read usb:1-2 --timeout-ms 500

    # Write one output report
    hid-host --write usb:1-2 --data 0400

    # Watch attach/detach events until Ctrl+C
    hid-host

    # Try everything against an in-memory device
    hid-host --mock --read usb:1-1

CONFIGURATION:
    The host looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/hid-host/host.toml
    3. /etc/hid-host/host.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Use an in-memory demo device instead of libusb
    #[arg(long)]
    mock: bool,

    /// List HID devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print the device list or read report as JSON
    #[arg(long)]
    json: bool,

    /// Read one input report from PATH
    #[arg(long, value_name = "PATH", conflicts_with_all = ["list_devices", "write"])]
    read: Option<String>,

    /// Read timeout in milliseconds
    #[arg(long, value_name = "N", default_value_t = 1000)]
    timeout_ms: u32,

    /// Write one output report to PATH
    #[arg(long, value_name = "PATH", requires = "data", conflicts_with = "list_devices")]
    write: Option<String>,

    /// Report bytes as hex (e.g. 0400ff)
    #[arg(long, value_name = "HEX")]
    data: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = HostConfig::default();
        let path = HostConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::load_config(&path.to_string_lossy()).context("Failed to load configuration")?
    } else {
        HostConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.host.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("rust-hid-host v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let host = if args.mock {
        info!("Using in-memory demo device at {}", MOCK_PATH);
        HidHost::start(&config, || Ok(demo_platform()))
    } else {
        HidHost::start(&config, RusbPlatform::new)
    };

    let result = run(&args, &host).await;

    info!("Shutting down HID host...");
    if let Err(e) = host.shutdown().await {
        error!("Error shutting down HID worker: {}", e);
    }

    result
}

async fn run(args: &Args, host: &HidHost) -> Result<()> {
    if args.list_devices {
        return list_devices_mode(host, args.json).await;
    }

    if let Some(path) = &args.read {
        return read_mode(host, path, args.timeout_ms, args.json).await;
    }

    if let Some(path) = &args.write {
        let data = args.data.as_deref().unwrap_or_default();
        let report = hex::decode(data).with_context(|| format!("Invalid hex data '{}'", data))?;
        return write_mode(host, path, &report).await;
    }

    monitor_mode(host).await
}

/// List HID devices and exit
async fn list_devices_mode(host: &HidHost, json: bool) -> Result<()> {
    let devices = host.list_devices().await.context("Failed to list devices")?;

    if json {
        let result = EnumerateResult { devices };
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No HID devices found.");
        return Ok(());
    }

    println!("Found {} device(s):\n", devices.len());
    for device in devices {
        println!(
            "  [{}] {:04x}:{:04x} - {} {}",
            device.path,
            device.vendor_id,
            device.product_id,
            device
                .manufacturer_string
                .as_deref()
                .unwrap_or("Unknown Manufacturer"),
            device.product_string.as_deref().unwrap_or("Unknown Product")
        );
        println!(
            "      Release {:x}.{:02x}",
            device.release_number >> 8,
            device.release_number & 0xff
        );
        if let Some(serial) = &device.serial_number {
            println!("      Serial: {}", serial);
        }
        println!();
    }

    Ok(())
}

/// Open PATH, read one report, close
async fn read_mode(host: &HidHost, path: &str, timeout_ms: u32, json: bool) -> Result<()> {
    host.open(path)
        .await
        .with_context(|| format!("Failed to open {}", path))?;

    let result = host.read(path, timeout_ms).await;
    close_quietly(host, path).await;

    let report = result.with_context(|| format!("Failed to read from {}", path))?;
    if json {
        let result = ReadResult { data: report };
        println!("{}", serde_json::to_string(&result)?);
    } else if report.is_empty() {
        println!("No report within {} ms", timeout_ms);
    } else {
        println!("{}", hex::encode(&report));
    }
    Ok(())
}

/// Open PATH, write one report, close
async fn write_mode(host: &HidHost, path: &str, report: &[u8]) -> Result<()> {
    if report.is_empty() {
        return Err(anyhow!("--data must contain at least one byte"));
    }

    host.open(path)
        .await
        .with_context(|| format!("Failed to open {}", path))?;

    let result = host.write(path, report).await;
    close_quietly(host, path).await;

    result.with_context(|| format!("Failed to write to {}", path))?;
    println!("Wrote {} byte(s) to {}", report.len(), path);
    Ok(())
}

/// Log lifecycle events until Ctrl+C
async fn monitor_mode(host: &HidHost) -> Result<()> {
    info!("Watching for device events (Ctrl+C to stop)");

    loop {
        tokio::select! {
            event = host.next_event() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(e) => {
                    error!("Event stream closed: {}", e);
                    return Ok(());
                }
            },
            signal = signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                    Err(e) => error!("Error waiting for Ctrl+C: {}", e),
                }
                return Ok(());
            }
        }
    }
}

async fn close_quietly(host: &HidHost, path: &str) {
    if let Err(e) = host.close(path).await {
        error!("Failed to close {}: {}", path, e);
    }
}

/// In-memory platform with one keyboard-like device that answers a report
fn demo_platform() -> MockPlatform {
    let platform = MockPlatform::new();
    platform.set_permission_mode(PermissionMode::AutoGrant);
    platform.add_device(
        MockDevice::hid(
            DeviceDescriptor {
                path: MOCK_PATH.to_string(),
                vendor_id: 0x1C40,
                product_id: 0x05B8,
                serial_number: None,
                release_number: 0x0100,
                manufacturer_string: Some("Demo".to_string()),
                product_string: Some("Demo HID Keyboard".to_string()),
            },
            8,
        )
        .with_serial("DEMO0001"),
    );
    platform.push_input_report(MOCK_PATH, &[0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00]);
    platform
}
