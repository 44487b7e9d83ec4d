//! Status command - show status of the running daemon

use anyhow::{Context, Result};
use clap::Args;

use super::connect_daemon;

/// Arguments for the status command
#[derive(Args)]
pub struct StatusArgs {
    /// Print the raw status as JSON
    #[arg(long)]
    json: bool,
}

/// Show status of the running daemon
pub async fn status(args: StatusArgs) -> Result<()> {
    let mut client = connect_daemon().await?;
    let status = client.status().await.context("Failed to query status")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let manager = &status.manager;
    println!("Capmux - Status\n");
    println!("  PID:        {}", status.pid);
    println!("  Uptime:     {:.0}s", status.uptime_seconds);
    println!("  App state:  {}", manager.app_state);
    if manager.enumerated {
        println!("  Devices:    {}", manager.known_devices);
    } else {
        println!("  Devices:    not enumerated");
    }
    if !manager.worker_running {
        println!("  Worker:     stopped");
    }
    println!("  Queue:      {}", manager.queue_len);
    if let Some(serial) = manager.in_flight {
        println!("  Starting:   entry {}", serial);
    }
    println!("  Deferred:   {}", manager.deferred);
    println!();

    println!("Sessions ({}):", manager.sessions.len());
    for session in &manager.sessions {
        println!(
            "  #{:<4} {:<8} {} {}",
            session.id,
            session.kind.to_string(),
            session.device_id,
            session.name
        );
    }
    println!();

    println!("Entries ({}):", manager.entries.len());
    for entry in &manager.entries {
        println!(
            "  {} {:<18} {:<9} active {} paused {} frames {} dropped {}",
            entry.serial,
            entry.key.to_string(),
            entry.state.to_string(),
            entry.active_clients,
            entry.paused_clients,
            entry.frames_delivered,
            entry.frames_dropped
        );
        if let Some(failure) = &entry.failure {
            println!("      failed: {}", failure);
        }
    }
    println!();

    let stats = &manager.stats;
    println!("Statistics:");
    println!(
        "  Starts:     {} device, {} tab/desktop, {} failed",
        stats.starts_device, stats.starts_derived, stats.start_failures
    );
    println!(
        "  Stops:      {} ok, {} without frames, {} due to error",
        stats.stops_ok,
        stats.stops_ok_no_frames_device + stats.stops_ok_no_frames_derived,
        stats.stops_due_to_error
    );
    println!(
        "  Frames:     {} delivered, {} dropped",
        stats.frames_delivered, stats.frames_dropped
    );

    Ok(())
}
