//! Shipyard - Entry Point
//!
//! Loads the settings, builds the provisioner and keeps it running until the
//! process is asked to stop.

use std::collections::HashMap;
use std::env;

use anyhow::Context;
use shipyard::filesys::file::File;
use shipyard::logs::{init_logging, LogOptions};
use shipyard::settings::Settings;
use shipyard::utils::version_info;
use shipyard::Provisioner;

use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "/etc/shipyard/settings.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version)?);
        return Ok(());
    }

    // Retrieve the settings file
    let config_path = cli_args
        .get("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);
    let settings: Settings = File::new(config_path)
        .read_json()
        .await
        .with_context(|| format!("unable to read settings file {}", config_path))?;

    // Initialize logging
    let _log_guard = match init_logging(LogOptions::from(&settings)) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let provisioner =
        Provisioner::from_settings(&settings).context("unable to build the provisioner")?;

    // Run diagnostics
    if cli_args.contains_key("diagnostic") || cli_args.contains_key("diag") {
        let report = provisioner
            .diagnose()
            .await
            .context("unable to list cluster nodes")?;
        if report.is_empty() {
            println!("No nodes configured");
        }
        for node in report {
            match node.error {
                None => println!("{}: ok", node.address),
                Some(e) => println!("{}: unreachable ({})", node.address, e),
            }
        }
        return Ok(());
    }

    info!(
        "Running shipyard {} ({}) with {} shared nodes, segregated: {}",
        version.version,
        version.git_hash,
        provisioner.cluster().nodes().len(),
        provisioner.settings().segregate
    );
    match provisioner.diagnose().await {
        Ok(report) => {
            for node in report.iter().filter(|n| n.error.is_some()) {
                warn!("Node {} is unreachable", node.address);
            }
        }
        Err(e) => error!("Unable to list cluster nodes: {e}"),
    }

    await_shutdown_signal().await?;
    Ok(())
}

async fn await_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        info!("Ctrl+C received, shutting down...");
    }

    Ok(())
}
