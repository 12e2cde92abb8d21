// BLE scanner: runs one scan session against BlueZ until Ctrl-C

use anyhow::Context;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::signal;

use ble_scan_session::bluetooth::BluezAdapter;
use ble_scan_session::config::{self, OutputFormat};
use ble_scan_session::{DiscoveredDevice, ScanSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting BLE scanner");

    let config = config::load_config().context("Failed to load configuration")?;
    let filter = config.scan.filter()?;
    info!("Configuration loaded successfully");

    let adapter = BluezAdapter::new(config.bluetooth.adapter.as_deref(), config.bluetooth.power_on)
        .await
        .context("Failed to initialize BLE adapter")?;
    info!("BLE adapter initialized: {}", adapter.name());

    let session = ScanSession::with_settings(Arc::new(adapter), config.scan.settings());

    let mut status = session.watch_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            info!("Scan status: {}", *status.borrow_and_update());
        }
    });

    let mut errors = session.errors();
    session
        .start(filter)
        .await
        .context("Failed to start BLE scan")?;

    let Some(mut devices) = session.on_device_found() else {
        let cause = errors.try_recv().context("BLE scan ended before it started")?;
        return Err(cause).context("BLE scan aborted");
    };

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            device = devices.recv() => match device {
                Some(device) => report(&device, config.output.format)?,
                None => {
                    let cause = errors.try_recv().context("Device stream closed")?;
                    return Err(cause).context("BLE scan aborted");
                }
            },
            result = &mut shutdown => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Shutting down...");
                break;
            }
        }
    }

    if let Err(e) = session.stop().await {
        warn!("Scan stop reported an error: {}", e);
    }

    // Anything still buffered arrived before the stop.
    while let Some(device) = devices.try_recv() {
        report(&device, config.output.format)?;
    }

    if let Ok(e) = errors.try_recv() {
        error!("Scan error during shutdown: {}", e);
    }

    Ok(())
}

fn report(device: &DiscoveredDevice, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => info!("{}", device),
        OutputFormat::Json => println!("{}", serde_json::to_string(device)?),
    }
    Ok(())
}
