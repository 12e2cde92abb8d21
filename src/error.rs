// Scan error taxonomy shared by the session and platform adapters

use thiserror::Error;

/// Failure codes carried by [`ScanError::PlatformError`].
///
/// Numbering follows the scan-failure codes Android reports to a scan
/// callback, so adapters for other stacks map onto the same values.
pub mod platform_code {
    pub const ALREADY_STARTED: i32 = 1;
    pub const APPLICATION_REGISTRATION_FAILED: i32 = 2;
    pub const INTERNAL_ERROR: i32 = 3;
    pub const FEATURE_UNSUPPORTED: i32 = 4;
    pub const OUT_OF_HARDWARE_RESOURCES: i32 = 5;
    pub const SCANNING_TOO_FREQUENTLY: i32 = 6;

    pub fn describe(code: i32) -> &'static str {
        match code {
            ALREADY_STARTED => "scan already started",
            APPLICATION_REGISTRATION_FAILED => "scan registration failed",
            INTERNAL_ERROR => "internal adapter error",
            FEATURE_UNSUPPORTED => "feature unsupported",
            OUT_OF_HARDWARE_RESOURCES => "out of hardware resources",
            SCANNING_TOO_FREQUENTLY => "scanning too frequently",
            _ => "unknown platform error",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Bluetooth adapter is disabled")]
    AdapterDisabled,
    #[error("BLE scan permission denied")]
    PermissionDenied,
    #[error("Platform error {0}: {}", describe_code(.0))]
    PlatformError(i32),
}

fn describe_code(code: &i32) -> &'static str {
    platform_code::describe(*code)
}
