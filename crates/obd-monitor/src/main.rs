//! OBD Monitor - command-line front end for ELM327 adapters

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use obd_protocol::mock::{MockDiscovery, MockTransport};
use obd_protocol::{ObdClient, SerialDiscovery, SerialTransport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::MonitorConfig;

#[derive(Parser)]
#[command(name = "obd-monitor")]
#[command(author, version, about = "ELM327 OBD-II telemetry and diagnostics monitor")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "OBD_MONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device path (e.g. /dev/rfcomm0)
    #[arg(short, long)]
    device: Option<String>,

    /// Serial baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Use the built-in mock adapter instead of a serial device
    #[arg(long)]
    mock: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connectable adapters
    Scan,

    /// Connect and print live telemetry
    Watch {
        /// Stop after this many poll cycles
        #[arg(long)]
        cycles: Option<u64>,

        /// Print snapshots as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Connect and print the MIL / monitor status summary
    Dtc,
}

/// Initialize logging; `RUST_LOG` overrides `default_level`
fn init_logging(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = MonitorConfig::load(cli.config.as_deref())?;
    if cli.device.is_some() {
        config.device = cli.device.clone();
    }
    if let Some(baud) = cli.baud {
        config.baud_rate = baud;
    }
    if cli.verbose {
        config.log_level = "debug".to_string();
    }

    init_logging(&config.log_level, config.json_logs);
    info!("=== OBD Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    let client = Arc::new(if cli.mock {
        info!("Using mock ELM327 adapter");
        ObdClient::new(
            Arc::new(MockTransport::new()),
            Arc::new(MockDiscovery::default()),
            config.client.clone(),
        )
    } else {
        ObdClient::new(
            Arc::new(SerialTransport::new(config.baud_rate)),
            Arc::new(SerialDiscovery),
            config.client.clone(),
        )
    });

    match cli.command {
        Commands::Scan => commands::scan(&client).await,
        Commands::Watch { cycles, json } => commands::watch(client, &config, cycles, json).await,
        Commands::Dtc => commands::dtc(&client, &config).await,
    }
}
