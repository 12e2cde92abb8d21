// Discovered device model

use serde::{Deserialize, Serialize};
use std::fmt;

/// One reported advertisement. Every callback produces a new value, repeated
/// advertisements from the same peripheral are not merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub name: Option<String>,
    pub address: String,
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    pub fn new(name: Option<String>, address: impl Into<String>, rssi: Option<i16>) -> Self {
        Self {
            name,
            address: address.into(),
            rssi,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unnamed")
    }
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Found BLE device! Name: {}, address: {}",
            self.display_name(),
            self.address
        )?;
        if let Some(rssi) = self.rssi {
            write!(f, ", rssi: {} dBm", rssi)?;
        }
        Ok(())
    }
}
