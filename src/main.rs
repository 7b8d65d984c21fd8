//! A5 Activator - headless activation for legacy A5 iOS devices
//!
//! This is the binary entry point. All logic lives in the library crates.

use std::path::PathBuf;

use a5_activator::{run_headless, HeadlessEvent, HeadlessOptions};
use a5act_app::config::{default_config_path, init_config_file, load_settings, resolve_payload_path};
use a5act_app::{ActivatorOptions, Pmd3Client, ToolAvailability};
use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use tracing::{error, info};

/// A5 Activator - activate legacy A5 iOS devices
#[derive(Parser, Debug)]
#[command(name = "a5act", version)]
#[command(about = "Watches for a legacy A5 iOS device and activates it", long_about = None)]
struct Args {
    /// Path to config.toml (defaults to the user config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Payload file to push to the device
    #[arg(long, value_name = "PATH")]
    payload: Option<PathBuf>,

    /// Only talk to the device with this UDID
    #[arg(long, value_name = "UDID")]
    udid: Option<String>,

    /// Start activation as soon as a compatible device is connected
    #[arg(long)]
    activate: bool,

    /// Exit after the first activation run finishes
    #[arg(long)]
    exit_on_finish: bool,

    /// Write a default config file and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);

    if args.init_config {
        let path = config_path.ok_or_else(|| eyre!("Could not determine a config directory"))?;
        if init_config_file(&path)? {
            eprintln!("Wrote default configuration to {}", path.display());
        } else {
            eprintln!("Configuration already exists at {}", path.display());
        }
        return Ok(());
    }

    // Log to file, stdout carries NDJSON
    a5act_core::logging::init()?;

    let mut settings = load_settings(config_path.as_deref());
    if let Some(payload) = args.payload {
        settings.payload.path = payload;
    }
    if args.udid.is_some() {
        settings.device.udid = args.udid;
    }

    let tool = ToolAvailability::check(&settings.device.tool).await;
    let Some(tool_path) = tool.tool_path.clone() else {
        let message = tool
            .unavailable_message()
            .unwrap_or("Device tool not found");
        HeadlessEvent::error(message.to_string(), true).emit();
        return Err(a5act_core::Error::tool_not_found(&settings.device.tool).into());
    };
    info!(
        "Using {} ({})",
        tool_path.display(),
        tool.version.as_deref().unwrap_or("unknown version")
    );

    let client = Pmd3Client::new(tool_path)
        .with_udid(settings.device.udid.clone())
        .with_command_timeout(settings.device.command_timeout());

    let options = HeadlessOptions {
        payload_path: resolve_payload_path(&settings.payload.path),
        auto_activate: args.activate,
        exit_on_finish: args.exit_on_finish,
    };

    let outcome = run_headless(client, ActivatorOptions::from_settings(&settings), options).await;
    match outcome {
        Ok(Some(outcome)) if !outcome.is_success() => {
            error!("Last activation run failed: {:?}", outcome);
            std::process::exit(1);
        }
        Ok(_) => Ok(()),
        Err(e) => {
            error!("Headless mode failed: {:?}", e);
            HeadlessEvent::error(e.to_string(), true).emit();
            Err(e.into())
        }
    }
}
