// Bluetooth Low Energy adapter using bluer crate

use async_trait::async_trait;
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport,
    ErrorKind,
};
use futures::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::task::JoinHandle;

use crate::adapter::{BleAdapter, ScanCallback};
use crate::device::DiscoveredDevice;
use crate::error::{platform_code, ScanError};
use crate::filter::{ScanFilter, ScanSettings};

pub struct BluezAdapter {
    adapter: Adapter,
    name: String,
    scans: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl BluezAdapter {
    /// Opens the named adapter, or the default one when `adapter_name` is `None`.
    pub async fn new(adapter_name: Option<&str>, power_on: bool) -> bluer::Result<Self> {
        let session = bluer::Session::new().await?;
        let adapter = match adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        let name = adapter.name().to_string();

        info!("Using Bluetooth adapter: {}", name);

        if power_on && !adapter.is_powered().await? {
            info!("Powering on adapter {}", name);
            adapter.set_powered(true).await?;
        }

        debug!("Adapter address: {}", adapter.address().await?);

        Ok(BluezAdapter {
            adapter,
            name,
            scans: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl BleAdapter for BluezAdapter {
    async fn is_enabled(&self) -> Result<bool, ScanError> {
        self.adapter.is_powered().await.map_err(scan_error)
    }

    async fn start_scan(
        &self,
        filter: &ScanFilter,
        settings: &ScanSettings,
        callback: ScanCallback,
    ) -> Result<(), ScanError> {
        {
            let mut scans = self.scans.lock();
            scans.retain(|_, task| !task.is_finished());
            if scans.contains_key(&callback.id()) {
                return Err(ScanError::PlatformError(platform_code::ALREADY_STARTED));
            }
        }

        // BlueZ schedules the scan window itself.
        debug!("Scan mode {:?} left to BlueZ", settings.mode);

        let mut discovery = DiscoveryFilter::default();
        discovery.transport = DiscoveryTransport::Le;
        discovery.duplicate_data = true;
        discovery.uuids = filter.service_uuid().into_iter().collect();
        self.adapter
            .set_discovery_filter(discovery)
            .await
            .map_err(scan_error)?;

        let events = self
            .adapter
            .discover_devices_with_changes()
            .await
            .map_err(scan_error)?;

        let adapter = self.adapter.clone();
        let id = callback.id();
        let task = tokio::spawn(async move {
            let mut events = Box::pin(events);
            while let Some(event) = events.next().await {
                if !callback.is_active() {
                    return;
                }
                match event {
                    AdapterEvent::DeviceAdded(addr) => {
                        if let Some(device) = read_device(&adapter, addr).await {
                            callback.on_result(device);
                        }
                    }
                    AdapterEvent::PropertyChanged(AdapterProperty::Powered(false)) => {
                        warn!("Adapter {} powered off during scan", adapter.name());
                        callback.on_failure(ScanError::AdapterDisabled);
                        return;
                    }
                    _ => (),
                }
            }
            if callback.is_active() {
                warn!("Discovery stream on {} ended unexpectedly", adapter.name());
                callback.on_failure(ScanError::PlatformError(platform_code::INTERNAL_ERROR));
            }
        });

        self.scans.lock().insert(id, task);
        debug!("Registered scan {} on {}", id, self.name);
        Ok(())
    }

    async fn stop_scan(&self, callback: &ScanCallback) -> Result<(), ScanError> {
        // Dropping the event stream ends the BlueZ discovery session.
        match self.scans.lock().remove(&callback.id()) {
            Some(task) => {
                task.abort();
                debug!("Released scan {} on {}", callback.id(), self.name);
            }
            None => debug!("Scan {} not registered on {}", callback.id(), self.name),
        }
        Ok(())
    }
}

async fn read_device(adapter: &Adapter, addr: Address) -> Option<DiscoveredDevice> {
    let device = match adapter.device(addr) {
        Ok(device) => device,
        Err(e) => {
            debug!("Device {} vanished before it could be read: {}", addr, e);
            return None;
        }
    };
    // Both are D-Bus round trips; issue them together.
    let (name, rssi) = tokio::join!(device.name(), device.rssi());
    Some(device_from_reads(addr, name, rssi))
}

/// A failed property read leaves that field empty rather than losing the result.
fn device_from_reads(
    addr: Address,
    name: bluer::Result<Option<String>>,
    rssi: bluer::Result<Option<i16>>,
) -> DiscoveredDevice {
    let name = name.unwrap_or_else(|e| {
        debug!("Could not read name of {}: {}", addr, e);
        None
    });
    let rssi = rssi.unwrap_or_else(|e| {
        debug!("Could not read RSSI of {}: {}", addr, e);
        None
    });
    DiscoveredDevice::new(name, addr.to_string(), rssi)
}

pub(crate) fn scan_error(err: bluer::Error) -> ScanError {
    debug!("BlueZ error: {}", err);
    match err.kind {
        ErrorKind::NotReady => ScanError::AdapterDisabled,
        ErrorKind::NotAuthorized | ErrorKind::NotPermitted => ScanError::PermissionDenied,
        ErrorKind::InProgress => ScanError::PlatformError(platform_code::ALREADY_STARTED),
        ErrorKind::NotSupported => ScanError::PlatformError(platform_code::FEATURE_UNSUPPORTED),
        _ => ScanError::PlatformError(platform_code::INTERNAL_ERROR),
    }
}
