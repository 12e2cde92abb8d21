// In-memory adapter standing in for the platform Bluetooth stack

#![allow(dead_code)]

use async_trait::async_trait;
use ble_scan_session::{BleAdapter, DiscoveredDevice, ScanCallback, ScanError, ScanFilter, ScanSettings};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
pub struct FakeAdapter {
    disabled: AtomicBool,
    next_enabled_error: Mutex<Option<ScanError>>,
    next_start_delay: Mutex<Option<Duration>>,
    next_stop_delay: Mutex<Option<Duration>>,
    next_start_error: Mutex<Option<ScanError>>,
    next_stop_error: Mutex<Option<ScanError>>,
    registrations: Mutex<Vec<(ScanCallback, ScanFilter)>>,
    // Every callback ever handed to us, for simulating late deliveries.
    seen: Mutex<Vec<ScanCallback>>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl FakeAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.disabled.store(!enabled, Ordering::SeqCst);
    }

    pub fn fail_next_start(&self, error: ScanError) {
        *self.next_start_error.lock() = Some(error);
    }

    pub fn fail_next_stop(&self, error: ScanError) {
        *self.next_stop_error.lock() = Some(error);
    }

    pub fn fail_next_enabled_query(&self, error: ScanError) {
        *self.next_enabled_error.lock() = Some(error);
    }

    /// The next start registers, then stalls for `delay` before returning.
    pub fn delay_next_start(&self, delay: Duration) {
        *self.next_start_delay.lock() = Some(delay);
    }

    /// The next stop stalls for `delay` before cancelling anything.
    pub fn delay_next_stop(&self, delay: Duration) {
        *self.next_stop_delay.lock() = Some(delay);
    }

    pub fn active_registrations(&self) -> usize {
        self.registrations.lock().len()
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn last_filter(&self) -> Option<ScanFilter> {
        self.registrations.lock().last().map(|(_, filter)| *filter)
    }

    /// Broadcasts an advertisement carrying no service UUIDs.
    pub fn advertise(&self, device: DiscoveredDevice) {
        self.advertise_with_services(device, &[]);
    }

    pub fn advertise_with_services(&self, device: DiscoveredDevice, services: &[Uuid]) {
        let targets: Vec<ScanCallback> = self
            .registrations
            .lock()
            .iter()
            .filter(|(_, filter)| filter.matches(services))
            .map(|(callback, _)| callback.clone())
            .collect();
        for callback in targets {
            callback.on_result(device.clone());
        }
    }

    /// Delivers through every callback ever registered, live or not.
    pub fn advertise_to_all_seen(&self, device: DiscoveredDevice) {
        let seen = self.seen.lock().clone();
        for callback in seen {
            callback.on_result(device.clone());
        }
    }

    /// Kills every live platform scan, as a radio or stack fault would.
    pub fn crash_scans(&self, error: ScanError) {
        let crashed: Vec<(ScanCallback, ScanFilter)> = self.registrations.lock().drain(..).collect();
        for (callback, _) in crashed {
            callback.on_failure(error.clone());
        }
    }
}

#[async_trait]
impl BleAdapter for FakeAdapter {
    async fn is_enabled(&self) -> Result<bool, ScanError> {
        if let Some(error) = self.next_enabled_error.lock().take() {
            return Err(error);
        }
        Ok(!self.disabled.load(Ordering::SeqCst))
    }

    async fn start_scan(
        &self,
        filter: &ScanFilter,
        _settings: &ScanSettings,
        callback: ScanCallback,
    ) -> Result<(), ScanError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.next_start_error.lock().take() {
            return Err(error);
        }
        self.seen.lock().push(callback.clone());
        self.registrations.lock().push((callback, *filter));
        let delay = self.next_start_delay.lock().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn stop_scan(&self, callback: &ScanCallback) -> Result<(), ScanError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.next_stop_delay.lock().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.next_stop_error.lock().take() {
            // The platform scan keeps running.
            return Err(error);
        }
        self.registrations
            .lock()
            .retain(|(registered, _)| registered.id() != callback.id());
        Ok(())
    }
}

pub fn device(name: Option<&str>, address: &str) -> DiscoveredDevice {
    DiscoveredDevice::new(name.map(str::to_string), address, None)
}

/// Lets detached release tasks run until `done` holds.
pub async fn settle(mut done: impl FnMut() -> bool) {
    for _ in 0..50 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
}

/// Drains whatever the stream holds without waiting.
pub fn drain(stream: &mut ble_scan_session::DeviceStream) -> Vec<DiscoveredDevice> {
    let mut devices = Vec::new();
    while let Some(device) = stream.try_recv() {
        devices.push(device);
    }
    devices
}
