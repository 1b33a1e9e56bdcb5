//! Subcommand implementations

use anyhow::{bail, Context, Result};
use obd_protocol::{DeviceDescriptor, ObdClient};
use obd_telemetry::TelemetryPoller;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::MonitorConfig;

pub async fn scan(client: &ObdClient) -> Result<()> {
    let devices = client.scan().await.context("Device discovery failed")?;
    if devices.is_empty() {
        println!("No adapters found");
    }
    for device in devices {
        println!("{}", device);
    }
    Ok(())
}

/// Configured device, or the first one discovery reports
async fn select_device(client: &ObdClient, config: &MonitorConfig) -> Result<DeviceDescriptor> {
    if let Some(path) = &config.device {
        return Ok(DeviceDescriptor::new(path.clone()));
    }

    let devices = client.scan().await.context("Device discovery failed")?;
    match devices.into_iter().next() {
        Some(device) => {
            info!("No device configured, using {}", device);
            Ok(device)
        }
        None => bail!("No adapters found; pass --device"),
    }
}

async fn connect(client: &ObdClient, config: &MonitorConfig) -> Result<()> {
    let device = select_device(client, config).await?;
    client
        .connect(&device)
        .await
        .with_context(|| format!("Failed to connect to {}", device))
}

pub async fn watch(
    client: Arc<ObdClient>,
    config: &MonitorConfig,
    cycles: Option<u64>,
    json: bool,
) -> Result<()> {
    connect(&client, config).await?;

    let poller = TelemetryPoller::new(Arc::clone(&client), config.poller.clone())?;
    let mut updates = poller.subscribe();
    let Some(mut handle) = poller.start() else {
        bail!("Telemetry poller already running");
    };

    let mut finished = false;
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if json {
                    println!("{}", serde_json::to_string(&snapshot)?);
                } else {
                    println!("{}", snapshot);
                }
                if cycles.is_some_and(|limit| snapshot.cycle >= limit) {
                    break;
                }
            }
            _ = &mut handle => {
                warn!("Polling ended, connection is {}", client.state());
                finished = true;
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    poller.stop();
    if !finished {
        let _ = handle.await;
    }
    client.disconnect().await;
    Ok(())
}

pub async fn dtc(client: &ObdClient, config: &MonitorConfig) -> Result<()> {
    connect(client, config).await?;

    // A malformed reply is still reported through the published status
    if let Err(e) = client.read_monitor_status().await {
        warn!("Monitor status request failed: {}", e);
    }
    println!("{}", client.dtc_status());

    client.disconnect().await;
    Ok(())
}
