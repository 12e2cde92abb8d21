// Scan filter and scan settings handed to the platform adapter

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bluetooth SIG base UUID, `0000xxxx-0000-1000-8000-00805F9B34FB`.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Battery Service
pub const BATTERY_SERVICE: u16 = 0x180F;

/// Restricts which advertisements the adapter reports. Fixed for the
/// lifetime of a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFilter {
    service_uuid: Option<Uuid>,
}

impl ScanFilter {
    /// No restriction, every advertisement is reported.
    pub fn any() -> Self {
        Self { service_uuid: None }
    }

    pub fn for_service(uuid: Uuid) -> Self {
        Self {
            service_uuid: Some(uuid),
        }
    }

    /// Expands a 16-bit SIG assigned number onto the Bluetooth base UUID.
    pub fn from_short_uuid(short: u16) -> Self {
        Self::for_service(short_uuid(short))
    }

    pub fn battery_service() -> Self {
        Self::from_short_uuid(BATTERY_SERVICE)
    }

    pub fn service_uuid(&self) -> Option<Uuid> {
        self.service_uuid
    }

    /// Software check for adapters that cannot filter in the radio.
    pub fn matches(&self, advertised: &[Uuid]) -> bool {
        match self.service_uuid {
            Some(uuid) => advertised.contains(&uuid),
            None => true,
        }
    }
}

pub fn short_uuid(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    #[default]
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSettings {
    #[serde(default)]
    pub mode: ScanMode,
}

impl ScanSettings {
    pub fn with_mode(mode: ScanMode) -> Self {
        Self { mode }
    }
}
