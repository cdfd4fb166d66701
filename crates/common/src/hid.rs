//! HID transport capability
//!
//! The controller never talks to an OS HID stack directly. It goes through
//! these two traits so the real `hidapi` backend and the scripted test device
//! are interchangeable.

use protocol::{DeviceDescriptor, DeviceIdentity};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Enumeration entry for one HID interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidDeviceInfo {
    /// Platform path used to open the interface (opaque)
    pub path: String,
    pub identity: DeviceIdentity,
    /// Product string (if available)
    pub product: Option<String>,
    /// Manufacturer string (if available)
    pub manufacturer: Option<String>,
    /// Serial number string (if available)
    pub serial_number: Option<String>,
}

impl HidDeviceInfo {
    /// Descriptor with "Unknown" placeholders for missing strings
    pub fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor::new(
            self.identity,
            self.product.clone(),
            self.manufacturer.clone(),
        )
        .with_serial(self.serial_number.clone())
    }
}

/// Failure reported by a HID backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The device is gone; the handle will never work again
    #[error("Device disconnected")]
    Disconnected,

    /// Any other platform error (busy, permission denied, I/O)
    #[error("{0}")]
    Io(String),
}

/// An open HID interface
///
/// Implementations must tolerate calls from different threads; callers
/// serialize write/read pairs themselves.
pub trait HidConnection: Send + Sync {
    /// Write one output report, report id included. Returns bytes written.
    fn write(&self, report: &[u8]) -> Result<usize, BackendError>;

    /// Wait up to `timeout` for one input report.
    ///
    /// `Ok(0)` means nothing arrived in time.
    fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, BackendError>;

    fn product_string(&self) -> Option<String>;

    fn manufacturer_string(&self) -> Option<String>;
}

/// Device discovery and open
pub trait HidBackend: Send + Sync {
    /// List HID interfaces, optionally only those matching `filter`
    fn enumerate(&self, filter: Option<DeviceIdentity>) -> Result<Vec<HidDeviceInfo>, BackendError>;

    /// Open an enumerated interface
    fn open(&self, info: &HidDeviceInfo) -> Result<Arc<dyn HidConnection>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_info() {
        let info = HidDeviceInfo {
            path: "/dev/hidraw3".to_string(),
            identity: DeviceIdentity::new(0x303A, 0x8000),
            product: None,
            manufacturer: Some("Espressif".to_string()),
            serial_number: Some("AB12".to_string()),
        };

        let desc = info.descriptor();
        assert_eq!(desc.product, "Unknown");
        assert_eq!(desc.manufacturer, "Espressif");
        assert_eq!(desc.serial_number.as_deref(), Some("AB12"));
    }
}
