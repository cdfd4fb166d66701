//! `hidapi` implementation of the HID capability

use common::{BackendError, HidBackend, HidConnection, HidDeviceInfo};
use hidapi::{HidApi, HidDevice, HidError};
use parking_lot::Mutex;
use protocol::DeviceIdentity;
use std::ffi::CString;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Native HID access through `hidapi`
pub struct HidapiBackend {
    api: Mutex<HidApi>,
}

impl HidapiBackend {
    pub fn new() -> Result<Self, BackendError> {
        let api = HidApi::new().map_err(map_hid_error)?;
        Ok(Self {
            api: Mutex::new(api),
        })
    }
}

impl HidBackend for HidapiBackend {
    fn enumerate(
        &self,
        filter: Option<DeviceIdentity>,
    ) -> Result<Vec<HidDeviceInfo>, BackendError> {
        let mut api = self.api.lock();
        api.refresh_devices().map_err(map_hid_error)?;

        let devices: Vec<HidDeviceInfo> = api
            .device_list()
            .filter(|d| filter.is_none_or(|id| id.matches(d.vendor_id(), d.product_id())))
            .map(|d| HidDeviceInfo {
                path: d.path().to_string_lossy().into_owned(),
                identity: DeviceIdentity::new(d.vendor_id(), d.product_id()),
                product: d.product_string().map(str::to_string),
                manufacturer: d.manufacturer_string().map(str::to_string),
                serial_number: d.serial_number().map(str::to_string),
            })
            .collect();

        debug!("hidapi reported {} matching interfaces", devices.len());
        Ok(devices)
    }

    fn open(&self, info: &HidDeviceInfo) -> Result<Arc<dyn HidConnection>, BackendError> {
        let path = CString::new(info.path.as_str())
            .map_err(|e| BackendError::Io(format!("Invalid device path: {}", e)))?;
        let device = self.api.lock().open_path(&path).map_err(map_hid_error)?;
        Ok(Arc::new(HidapiConnection {
            device: Mutex::new(device),
        }))
    }
}

/// An open `hidapi` device
///
/// The transport already serializes write/read pairs; the mutex only makes
/// the handle shareable across threads.
pub struct HidapiConnection {
    device: Mutex<HidDevice>,
}

impl HidConnection for HidapiConnection {
    fn write(&self, report: &[u8]) -> Result<usize, BackendError> {
        self.device.lock().write(report).map_err(map_hid_error)
    }

    fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, BackendError> {
        self.device
            .lock()
            .read_timeout(buf, timeout_millis(timeout))
            .map_err(map_hid_error)
    }

    fn product_string(&self) -> Option<String> {
        self.device.lock().get_product_string().ok().flatten()
    }

    fn manufacturer_string(&self) -> Option<String> {
        self.device.lock().get_manufacturer_string().ok().flatten()
    }
}

/// hidapi takes whole milliseconds and treats 0 as a non-blocking poll, so
/// any non-zero wait rounds up.
fn timeout_millis(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_nanos().div_ceil(1_000_000)).unwrap_or(i32::MAX)
}

/// hidapi reports every failure as text; an unplugged device is only
/// recognisable by its message.
fn map_hid_error(err: HidError) -> BackendError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("no such device")
        || lower.contains("device disconnected")
        || lower.contains("not connected")
    {
        BackendError::Disconnected
    } else {
        BackendError::Io(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_hid_error() {
        let gone = HidError::HidApiError {
            message: "hid_error is not implemented yet: No such device".to_string(),
        };
        assert_eq!(map_hid_error(gone), BackendError::Disconnected);

        let busy = HidError::HidApiError {
            message: "Device or resource busy".to_string(),
        };
        assert!(matches!(map_hid_error(busy), BackendError::Io(_)));
    }

    #[test]
    fn test_timeout_millis_rounds_up() {
        assert_eq!(timeout_millis(Duration::ZERO), 0);
        assert_eq!(timeout_millis(Duration::from_nanos(1)), 1);
        assert_eq!(timeout_millis(Duration::from_micros(999)), 1);
        assert_eq!(timeout_millis(Duration::from_micros(1001)), 2);
        assert_eq!(timeout_millis(Duration::from_millis(250)), 250);
        assert_eq!(timeout_millis(Duration::MAX), i32::MAX);
    }
}
