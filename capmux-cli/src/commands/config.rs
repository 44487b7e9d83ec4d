//! Config command - manage configuration files

use anyhow::{Context, Result};
use capmux_core::config::{ConfigFile, sample_config};
use clap::{Args, Subcommand};

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the path to the config file
    Path,

    /// Show the effective configuration
    Show,

    /// Generate a default config file
    Init {
        /// Force overwrite if file exists
        #[arg(short, long)]
        force: bool,
    },

    /// Check the config file for settings the manager would reject
    Check,

    /// Print a sample configuration to stdout
    Sample,
}

/// Run config subcommand
pub async fn config(args: ConfigArgs) -> Result<()> {
    let path = ConfigFile::default_path();

    match args.command {
        ConfigCommand::Path => {
            println!("{}", path.display());
            if path.exists() {
                println!("(file exists)");
            } else {
                println!("(file does not exist)");
            }
        }
        ConfigCommand::Show => {
            let config = ConfigFile::load_from(path.clone()).context("Failed to load config file")?;
            if path.exists() {
                println!("# Loaded from {}\n", path.display());
            } else {
                println!("# No file at {}, showing defaults\n", path.display());
            }
            print!(
                "{}",
                toml::to_string_pretty(&config).context("Failed to render config")?
            );
        }
        ConfigCommand::Init { force } => {
            if force && path.exists() {
                std::fs::remove_file(&path).context("Failed to replace config file")?;
            }

            if ConfigFile::create_default_if_missing().context("Failed to write config file")? {
                println!("Created configuration file: {}", path.display());
                println!();
                println!("Edit this file to add fake devices or change buffer counts.");
            } else {
                println!("Configuration file already exists: {}", path.display());
                println!();
                println!("Use --force to overwrite, or edit the existing file.");
            }
        }
        ConfigCommand::Check => {
            let config = ConfigFile::load_from(path.clone()).context("Failed to load config file")?;
            match config.manager_config().validate_strict() {
                Ok(()) => println!("{}: OK", path.display()),
                Err(problem) => anyhow::bail!("{}: {}", path.display(), problem),
            }
            if config.fake.devices.is_empty() {
                println!("warning: no fake devices configured; only tabs and desktops can be captured");
            }
        }
        ConfigCommand::Sample => {
            print!("{}", sample_config());
        }
    }

    Ok(())
}
