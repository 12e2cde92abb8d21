// BLE scan session manager
//
// A single-writer start/stop contract over a platform BLE adapter, with a
// per-scan stream of discovered devices and a status observer.

pub mod adapter;
#[cfg(feature = "bluez")]
pub mod bluetooth;
pub mod config;
pub mod device;
pub mod error;
pub mod filter;
pub mod session;

pub use adapter::{BleAdapter, ScanCallback};
pub use device::DiscoveredDevice;
pub use error::ScanError;
pub use filter::{ScanFilter, ScanMode, ScanSettings};
pub use session::{DeviceStream, ScanSession, ScanStatus};
