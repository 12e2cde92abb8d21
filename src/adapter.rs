// Platform Bluetooth adapter capability consumed by the scan session

use async_trait::async_trait;
use log::trace;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::device::DiscoveredDevice;
use crate::error::ScanError;
use crate::filter::{ScanFilter, ScanSettings};

/// The radio side of a scan. Implementations deliver results through the
/// [`ScanCallback`] they were registered with, from whatever task or thread
/// the platform stack uses.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    async fn is_enabled(&self) -> Result<bool, ScanError>;

    async fn start_scan(
        &self,
        filter: &ScanFilter,
        settings: &ScanSettings,
        callback: ScanCallback,
    ) -> Result<(), ScanError>;

    /// Cancels the registration made with `callback`. Unknown callbacks are
    /// a no-op.
    async fn stop_scan(&self, callback: &ScanCallback) -> Result<(), ScanError>;
}

/// Receiving end of a callback, implemented by the session.
pub(crate) trait ScanSink: Send + Sync {
    fn deliver(&self, registration: u64, device: DiscoveredDevice);
    fn fail(&self, registration: u64, error: ScanError);
}

/// Handle for one scan registration. Clones share the same registration.
#[derive(Clone)]
pub struct ScanCallback {
    id: u64,
    active: Arc<AtomicBool>,
    sink: Weak<dyn ScanSink>,
}

impl ScanCallback {
    pub(crate) fn new(id: u64, sink: Weak<dyn ScanSink>) -> Self {
        Self {
            id,
            active: Arc::new(AtomicBool::new(true)),
            sink,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// False once the owning session stopped this scan or the scan failed.
    /// Adapters may use it to wind down delivery early.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn on_result(&self, device: DiscoveredDevice) {
        if !self.is_active() {
            trace!("Dropping result for inactive scan {}: {}", self.id, device.address);
            return;
        }
        if let Some(sink) = self.sink.upgrade() {
            sink.deliver(self.id, device);
        }
    }

    /// Reports that the platform scan died on its own.
    pub fn on_failure(&self, error: ScanError) {
        if !self.is_active() {
            trace!("Ignoring failure for inactive scan {}: {}", self.id, error);
            return;
        }
        if let Some(sink) = self.sink.upgrade() {
            sink.fail(self.id, error);
        }
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ScanCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanCallback")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
