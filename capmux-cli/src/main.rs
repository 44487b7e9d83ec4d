//! Capmux CLI
//!
//! Capture-device session manager: share cameras, tabs and screens between
//! many clients.
//!
//! # Usage
//!
//! ```bash
//! # List capture devices
//! capmux devices
//!
//! # Capture 90 frames from a camera
//! capmux capture --device fake-cam-0 --frames 90
//!
//! # Run the daemon and talk to it
//! capmux daemon
//! capmux status
//! capmux background
//! capmux stop
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Capmux - capture-device session manager
#[derive(Parser)]
#[command(name = "capmux")]
#[command(version)]
#[command(about = "Capture-device session manager", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List capture devices and their formats
    #[command(alias = "ls")]
    Devices(commands::DevicesArgs),

    /// Capture from a device, tab or desktop in the foreground
    Capture(commands::CaptureArgs),

    /// Run the session manager as a daemon
    Daemon,

    /// Show status of the running daemon
    Status(commands::StatusArgs),

    /// Stop the running daemon
    Stop,

    /// Release hardware devices in the running daemon
    Background,

    /// Restart hardware devices released by `background`
    Foreground,

    /// Manage the configuration file
    Config(commands::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("capmux={}", level).parse()?)
                .add_directive(format!("capmux_core={}", level).parse()?),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Devices(args) => commands::devices(args).await?,
        Commands::Capture(args) => commands::capture(args).await?,
        Commands::Daemon => commands::daemon().await?,
        Commands::Status(args) => commands::status(args).await?,
        Commands::Stop => commands::stop().await?,
        Commands::Background => commands::background().await?,
        Commands::Foreground => commands::foreground().await?,
        Commands::Config(args) => commands::config(args).await?,
    }

    Ok(())
}
