// BLE scan session: single-writer start/stop over a platform adapter

use futures::Stream;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc, watch};

use crate::adapter::{BleAdapter, ScanCallback, ScanSink};
use crate::device::DiscoveredDevice;
use crate::error::ScanError;
use crate::filter::{ScanFilter, ScanSettings};

const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Results kept for the first observer of a scan. Oldest are dropped first.
pub const BACKLOG_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    Idle,
    Scanning,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::Idle => write!(f, "idle"),
            ScanStatus::Scanning => write!(f, "scanning"),
        }
    }
}

/// Owns the scan lifecycle for one adapter.
///
/// At most one platform registration is live at a time. `start` and `stop`
/// are serialized; `status` and device delivery may run concurrently with
/// either of them.
pub struct ScanSession {
    adapter: Arc<dyn BleAdapter>,
    settings: ScanSettings,
    shared: Arc<Shared>,
    op_lock: tokio::sync::Mutex<()>,
}

struct Shared {
    inner: Mutex<Inner>,
    status_tx: watch::Sender<ScanStatus>,
    error_tx: broadcast::Sender<ScanError>,
}

struct Inner {
    status: ScanStatus,
    next_id: u64,
    registration: Option<Registration>,
}

struct Registration {
    callback: ScanCallback,
    filter: ScanFilter,
    subscribers: Vec<mpsc::UnboundedSender<DiscoveredDevice>>,
    // Most recent results since the registration began, replayed to the first observer.
    backlog: Option<VecDeque<DiscoveredDevice>>,
    backlog_dropped: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.callback.deactivate();
    }
}

impl Inner {
    fn current(&self, id: u64) -> Option<&Registration> {
        self.registration
            .as_ref()
            .filter(|registration| registration.callback.id() == id)
    }
}

impl Shared {
    fn set_status(&self, inner: &mut Inner, status: ScanStatus) {
        inner.status = status;
        self.status_tx.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    fn take_registration(&self, id: u64) -> Option<Registration> {
        let mut inner = self.inner.lock();
        inner.current(id)?;
        inner.registration.take()
    }
}

/// Asks the adapter to drop a registration from a detached task, for paths
/// that cannot await.
fn release_in_background(adapter: Arc<dyn BleAdapter>, callback: ScanCallback) {
    callback.deactivate();
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = adapter.stop_scan(&callback).await {
                    warn!("Failed to release BLE scan {}: {}", callback.id(), e);
                }
            });
        }
        Err(_) => warn!(
            "No runtime to release BLE scan {}; platform scan left to the adapter",
            callback.id()
        ),
    }
}

/// Undoes a registration whose `start` was abandoned before it committed.
struct PendingStart<'a> {
    shared: &'a Shared,
    adapter: &'a Arc<dyn BleAdapter>,
    callback: ScanCallback,
    armed: bool,
}

impl PendingStart<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("BLE scan start {} abandoned; releasing it", self.callback.id());
        drop(self.shared.take_registration(self.callback.id()));
        release_in_background(self.adapter.clone(), self.callback.clone());
    }
}

/// Finishes a platform stop in the background if `stop` is abandoned mid-call.
struct PendingStop {
    adapter: Arc<dyn BleAdapter>,
    callback: ScanCallback,
    armed: bool,
}

impl PendingStop {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingStop {
    fn drop(&mut self) {
        if self.armed {
            release_in_background(self.adapter.clone(), self.callback.clone());
        }
    }
}

impl ScanSink for Shared {
    fn deliver(&self, registration: u64, device: DiscoveredDevice) {
        let mut inner = self.inner.lock();
        match inner.registration.as_mut() {
            Some(current) if current.callback.id() == registration => {
                if let Some(backlog) = current.backlog.as_mut() {
                    if backlog.len() == BACKLOG_CAPACITY {
                        backlog.pop_front();
                        current.backlog_dropped += 1;
                        if current.backlog_dropped == 1 {
                            debug!("Backlog of scan {} full, dropping oldest results", registration);
                        }
                    }
                    backlog.push_back(device.clone());
                }
                current
                    .subscribers
                    .retain(|subscriber| subscriber.send(device.clone()).is_ok());
            }
            _ => debug!("Dropping result from stale scan {}", registration),
        }
    }

    fn fail(&self, registration: u64, error: ScanError) {
        let torn_down = {
            let mut inner = self.inner.lock();
            if inner.current(registration).is_none() {
                debug!("Ignoring failure from stale scan {}: {}", registration, error);
                return;
            }
            let torn_down = inner.registration.take();
            self.set_status(&mut inner, ScanStatus::Idle);
            torn_down
        };

        error!("BLE scan aborted by adapter: {}", error);
        if self.error_tx.send(error).is_err() {
            debug!("No error observers subscribed");
        }
        // Streams close only after the error is observable.
        drop(torn_down);
    }
}

impl ScanSession {
    pub fn new(adapter: Arc<dyn BleAdapter>) -> Self {
        Self::with_settings(adapter, ScanSettings::default())
    }

    pub fn with_settings(adapter: Arc<dyn BleAdapter>, settings: ScanSettings) -> Self {
        let (status_tx, _) = watch::channel(ScanStatus::Idle);
        let (error_tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            adapter,
            settings,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    status: ScanStatus::Idle,
                    next_id: 1,
                    registration: None,
                }),
                status_tx,
                error_tx,
            }),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> ScanSettings {
        self.settings
    }

    pub fn status(&self) -> ScanStatus {
        self.shared.inner.lock().status
    }

    /// Filter of the running scan.
    pub fn filter(&self) -> Option<ScanFilter> {
        let inner = self.shared.inner.lock();
        match inner.status {
            ScanStatus::Scanning => inner.registration.as_ref().map(|r| r.filter),
            ScanStatus::Idle => None,
        }
    }

    pub fn watch_status(&self) -> watch::Receiver<ScanStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Failures raised by the adapter after a scan was started.
    pub fn errors(&self) -> broadcast::Receiver<ScanError> {
        self.shared.error_tx.subscribe()
    }

    pub async fn start(&self, filter: ScanFilter) -> Result<(), ScanError> {
        let _op = self.op_lock.lock().await;

        if self.status() == ScanStatus::Scanning {
            debug!("Start requested while already scanning, ignoring");
            return Ok(());
        }

        if !self.adapter.is_enabled().await? {
            warn!("Cannot start BLE scan: adapter is disabled");
            return Err(ScanError::AdapterDisabled);
        }

        let callback = self.register(filter);
        let pending = PendingStart {
            shared: &self.shared,
            adapter: &self.adapter,
            callback: callback.clone(),
            armed: true,
        };
        info!(
            "Starting BLE scan (service filter: {}, mode: {:?})",
            filter
                .service_uuid()
                .map(|uuid| uuid.to_string())
                .unwrap_or_else(|| "none".to_string()),
            self.settings.mode
        );

        if let Err(e) = self
            .adapter
            .start_scan(&filter, &self.settings, callback.clone())
            .await
        {
            warn!("Failed to start BLE scan: {}", e);
            // Rejected by the platform, nothing to release there.
            drop(self.shared.take_registration(callback.id()));
            pending.disarm();
            return Err(e);
        }
        pending.disarm();

        let mut inner = self.shared.inner.lock();
        if inner.current(callback.id()).is_some() {
            self.shared.set_status(&mut inner, ScanStatus::Scanning);
        } else {
            warn!("BLE scan failed while starting; session stays idle");
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ScanError> {
        let _op = self.op_lock.lock().await;

        let registration = {
            let mut inner = self.shared.inner.lock();
            let registration = inner.registration.take();
            self.shared.set_status(&mut inner, ScanStatus::Idle);
            registration
        };
        let Some(registration) = registration else {
            debug!("Stop requested while idle, ignoring");
            return Ok(());
        };
        let callback = registration.callback.clone();
        // Closes the device streams and silences late deliveries.
        drop(registration);

        let pending = PendingStop {
            adapter: self.adapter.clone(),
            callback: callback.clone(),
            armed: true,
        };
        let result = self.adapter.stop_scan(&callback).await;
        pending.disarm();

        match &result {
            Ok(()) => info!("BLE scan stopped"),
            Err(e) => warn!("Adapter failed to stop BLE scan ({}); session reset to idle", e),
        }
        result
    }

    /// Device events of the current scan, `None` while idle.
    ///
    /// The first stream taken after a start replays up to `BACKLOG_CAPACITY`
    /// of the latest results since the scan was registered; later ones start
    /// at the moment of the call.
    pub fn on_device_found(&self) -> Option<DeviceStream> {
        let mut inner = self.shared.inner.lock();
        if inner.status != ScanStatus::Scanning {
            return None;
        }
        let registration = inner.registration.as_mut()?;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(backlog) = registration.backlog.take() {
            if registration.backlog_dropped > 0 {
                debug!(
                    "{} early results of scan {} were dropped before anyone observed them",
                    registration.backlog_dropped,
                    registration.callback.id()
                );
            }
            for device in backlog {
                // The receiver is still in hand, so this cannot fail.
                let _ = tx.send(device);
            }
        }
        registration.subscribers.push(tx);
        Some(DeviceStream { rx })
    }

    fn register(&self, filter: ScanFilter) -> ScanCallback {
        let sink: Arc<dyn ScanSink> = self.shared.clone();
        let mut inner = self.shared.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        let callback = ScanCallback::new(id, Arc::downgrade(&sink));
        inner.registration = Some(Registration {
            callback: callback.clone(),
            filter,
            subscribers: Vec::new(),
            backlog: Some(VecDeque::new()),
            backlog_dropped: 0,
        });
        callback
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        let registration = self.shared.inner.lock().registration.take();
        if let Some(registration) = registration {
            release_in_background(self.adapter.clone(), registration.callback.clone());
        }
    }
}

/// Stream of devices found by one scan. Ends when that scan stops or fails.
#[derive(Debug)]
pub struct DeviceStream {
    rx: mpsc::UnboundedReceiver<DiscoveredDevice>,
}

impl DeviceStream {
    pub async fn recv(&mut self) -> Option<DiscoveredDevice> {
        self.rx.recv().await
    }

    /// Next already-delivered device, without waiting.
    pub fn try_recv(&mut self) -> Option<DiscoveredDevice> {
        self.rx.try_recv().ok()
    }
}

impl Stream for DeviceStream {
    type Item = DiscoveredDevice;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
