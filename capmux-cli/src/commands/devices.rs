//! Devices command - list capture devices

use anyhow::{Context, Result};
use capmux_core::config::ConfigFile;
use capmux_core::ipc;
use capmux_core::types::DeviceDescriptor;
use clap::Args;

use super::{connect_daemon, local_manager};

/// Arguments for the devices command
#[derive(Args)]
pub struct DevicesArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Use the cached list of a running daemon instead of re-enumerating
    #[arg(long)]
    cached: bool,
}

/// List capture devices
pub async fn devices(args: DevicesArgs) -> Result<()> {
    if ipc::daemon_running().await {
        let mut client = connect_daemon().await?;
        let devices = client
            .devices(!args.cached)
            .await
            .context("Failed to list devices from daemon")?;
        return print_devices(&devices, None, args.json);
    }

    let config = ConfigFile::load_or_default();
    let handle = local_manager(&config)?;
    let devices = handle
        .enumerate_devices()
        .await
        .context("Failed to enumerate devices")?;

    let mut formats = Vec::new();
    for device in &devices {
        let session = handle
            .open(capmux_core::StreamDescriptor::device(&device.device_id))
            .await?;
        formats.push(handle.supported_formats(session).await?);
        handle.close(session).await?;
    }
    handle.shutdown().await?;

    print_devices(&devices, Some(&formats), args.json)
}

fn print_devices(
    devices: &[DeviceDescriptor],
    formats: Option<&[Vec<capmux_core::VideoFormat>]>,
    json: bool,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No capture devices found.");
        return Ok(());
    }

    println!("Capture devices:\n");
    for (i, device) in devices.iter().enumerate() {
        println!("  {}  {}", device.device_id, device.name_and_model());
        if let Some(formats) = formats.and_then(|f| f.get(i)) {
            if formats.is_empty() {
                println!("      (formats unavailable)");
            }
            for format in formats {
                println!("      {}", format);
            }
        }
    }
    Ok(())
}
