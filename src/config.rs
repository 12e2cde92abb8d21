// Configuration module for the BLE scanner

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::filter::{short_uuid, ScanFilter, ScanMode, ScanSettings, BATTERY_SERVICE};

pub const DEFAULT_CONFIG_PATH: &str = "/config/options.json";
pub const CONFIG_PATH_ENV: &str = "BLE_SCAN_CONFIG";
const ENV_PREFIX: &str = "BLE_SCAN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid service UUID {0:?}")]
    InvalidServiceUuid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bluetooth: BluetoothConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BluetoothConfig {
    #[serde(default)]
    pub adapter: Option<String>,
    #[serde(default = "default_power_on")]
    pub power_on: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Full UUID or 16-bit short form; empty or null scans without a filter.
    #[serde(default = "default_service_uuid")]
    pub service_uuid: Option<String>,
    #[serde(default)]
    pub mode: ScanMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            power_on: default_power_on(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            mode: ScanMode::default(),
        }
    }
}

impl ScanConfig {
    pub fn filter(&self) -> Result<ScanFilter, ConfigError> {
        let raw = match self.service_uuid.as_deref().map(str::trim) {
            None | Some("") => return Ok(ScanFilter::any()),
            Some(raw) => raw,
        };
        if raw.len() == 4 {
            if let Ok(short) = u16::from_str_radix(raw, 16) {
                return Ok(ScanFilter::for_service(short_uuid(short)));
            }
        }
        Uuid::parse_str(raw)
            .map(ScanFilter::for_service)
            .map_err(|_| ConfigError::InvalidServiceUuid(raw.to_string()))
    }

    pub fn settings(&self) -> ScanSettings {
        ScanSettings::with_mode(self.mode)
    }
}

fn default_power_on() -> bool {
    true
}

fn default_service_uuid() -> Option<String> {
    Some(short_uuid(BATTERY_SERVICE).to_string())
}

/// Loads from the path in `BLE_SCAN_CONFIG`, or the add-on options file.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_from(&path)
}

/// Built-in defaults, then the JSON file if present, then `BLE_SCAN__*`
/// environment overrides.
pub fn load_from(path: &str) -> Result<Config, ConfigError> {
    let config: Config = config::Config::builder()
        .add_source(File::new(path, FileFormat::Json).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?
        .try_deserialize()?;

    // Surface a bad UUID at load time rather than at first scan.
    config.scan.filter()?;
    Ok(config)
}
