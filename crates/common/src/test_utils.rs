//! Test utilities for hid-controller
//!
//! Provides a scripted HID backend and device so the controller can be tested
//! without hardware, plus small async helpers.
//!
//! # Example
//!
//! ```
//! use common::hid::HidBackend;
//! use common::test_utils::{MockBackend, MockDevice, create_mock_device_info};
//! use protocol::DeviceIdentity;
//!
//! let identity = DeviceIdentity::new(0x303A, 0x8000);
//! let backend = MockBackend::new();
//! let device = MockDevice::firmware(23.5, 40.0);
//! backend.add_device(create_mock_device_info(identity, 1), device);
//!
//! assert_eq!(backend.enumerate(Some(identity)).unwrap().len(), 1);
//! ```

use crate::hid::{BackendError, HidBackend, HidConnection, HidDeviceInfo};
use protocol::{DeviceIdentity, Opcode, encode_f32_be};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock enumeration entry
///
/// # Example
/// ```
/// use common::test_utils::create_mock_device_info;
/// use protocol::DeviceIdentity;
///
/// let info = create_mock_device_info(DeviceIdentity::new(0x1234, 0x5678), 3);
/// assert_eq!(info.path, "mock://3");
/// assert_eq!(info.product.as_deref(), Some("Test Product 3"));
/// ```
pub fn create_mock_device_info(identity: DeviceIdentity, index: u32) -> HidDeviceInfo {
    HidDeviceInfo {
        path: format!("mock://{}", index),
        identity,
        product: Some(format!("Test Product {}", index)),
        manufacturer: Some(format!("Test Manufacturer {}", index)),
        serial_number: Some(format!("SN{:06}", index)),
    }
}

/// Run a future with timeout (for tests)
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
/// assert_eq!(result, 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

type Responder = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Scripted HID device
///
/// Records every written report and answers reads from a reply queue. When the
/// queue is empty the device is silent: a read waits out its timeout (or the
/// configured read slice) and returns zero bytes.
pub struct MockDevice {
    writes: Mutex<Vec<Vec<u8>>>,
    replies: Mutex<VecDeque<Result<Vec<u8>, BackendError>>>,
    responder: Mutex<Option<Responder>>,
    write_error: Mutex<Option<BackendError>>,
    unplugged: AtomicBool,
    read_slice: Mutex<Option<Duration>>,
    io_delay: Mutex<Duration>,
    read_calls: AtomicUsize,
    active_io: AtomicUsize,
    max_active_io: AtomicUsize,
    product: Option<String>,
    manufacturer: Option<String>,
}

impl MockDevice {
    /// A device that never answers
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(
            Some("Mock HID".to_string()),
            Some("Mock Vendor".to_string()),
        ))
    }

    /// A device without product/manufacturer strings
    pub fn anonymous() -> Arc<Self> {
        Arc::new(Self::build(None, None))
    }

    /// A device that answers sensor requests like the real firmware
    pub fn firmware(temperature: f32, humidity: f32) -> Arc<Self> {
        let device = Self::new();
        device.set_responder(move |report| match report.get(1).copied() {
            Some(Opcode::GET_TEMPERATURE) => Some(encode_f32_be(temperature).to_vec()),
            Some(Opcode::GET_HUMIDITY) => Some(encode_f32_be(humidity).to_vec()),
            _ => None,
        });
        device
    }

    fn build(product: Option<String>, manufacturer: Option<String>) -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            responder: Mutex::new(None),
            write_error: Mutex::new(None),
            unplugged: AtomicBool::new(false),
            read_slice: Mutex::new(None),
            io_delay: Mutex::new(Duration::ZERO),
            read_calls: AtomicUsize::new(0),
            active_io: AtomicUsize::new(0),
            max_active_io: AtomicUsize::new(0),
            product,
            manufacturer,
        }
    }

    /// Queue one report for the next read
    pub fn push_reply(&self, reply: impl Into<Vec<u8>>) {
        lock(&self.replies).push_back(Ok(reply.into()));
    }

    /// Queue one failing read
    pub fn push_read_error(&self, error: BackendError) {
        lock(&self.replies).push_back(Err(error));
    }

    /// Generate replies from written reports
    pub fn set_responder(
        &self,
        responder: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) {
        *lock(&self.responder) = Some(Box::new(responder));
    }

    /// Make every write fail (None restores normal writes)
    pub fn fail_writes(&self, error: Option<BackendError>) {
        *lock(&self.write_error) = error;
    }

    /// Silent reads return after at most `slice` instead of the full timeout
    pub fn set_read_slice(&self, slice: Option<Duration>) {
        *lock(&self.read_slice) = slice;
    }

    /// Hold every write/read for `delay` (widens race windows in tests)
    pub fn set_io_delay(&self, delay: Duration) {
        *lock(&self.io_delay) = delay;
    }

    /// Physically remove the device; all further I/O fails
    pub fn unplug(&self) {
        self.unplugged.store(true, Ordering::SeqCst);
    }

    /// Reports written so far
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.writes).clone()
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Highest number of write/read calls observed running at once
    pub fn max_concurrent_io(&self) -> usize {
        self.max_active_io.load(Ordering::SeqCst)
    }

    fn enter_io(&self) -> IoGuard<'_> {
        let now = self.active_io.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_io.fetch_max(now, Ordering::SeqCst);
        let delay = *lock(&self.io_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        IoGuard { device: self }
    }
}

struct IoGuard<'a> {
    device: &'a MockDevice,
}

impl Drop for IoGuard<'_> {
    fn drop(&mut self) {
        self.device.active_io.fetch_sub(1, Ordering::SeqCst);
    }
}

impl HidConnection for MockDevice {
    fn write(&self, report: &[u8]) -> Result<usize, BackendError> {
        let _io = self.enter_io();
        if self.unplugged.load(Ordering::SeqCst) {
            return Err(BackendError::Disconnected);
        }
        if let Some(error) = lock(&self.write_error).clone() {
            return Err(error);
        }

        lock(&self.writes).push(report.to_vec());
        if let Some(responder) = lock(&self.responder).as_ref()
            && let Some(reply) = responder(report)
        {
            lock(&self.replies).push_back(Ok(reply));
        }
        Ok(report.len())
    }

    fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, BackendError> {
        let _io = self.enter_io();
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if self.unplugged.load(Ordering::SeqCst) {
            return Err(BackendError::Disconnected);
        }

        let next = lock(&self.replies).pop_front();
        match next {
            Some(Ok(reply)) => {
                let n = reply.len().min(buf.len());
                buf[..n].copy_from_slice(&reply[..n]);
                Ok(n)
            }
            Some(Err(error)) => Err(error),
            None => {
                let wait = match *lock(&self.read_slice) {
                    Some(slice) => slice.min(timeout),
                    None => timeout,
                };
                std::thread::sleep(wait);
                Ok(0)
            }
        }
    }

    fn product_string(&self) -> Option<String> {
        self.product.clone()
    }

    fn manufacturer_string(&self) -> Option<String> {
        self.manufacturer.clone()
    }
}

enum MockEntry {
    Ready(Arc<MockDevice>),
    Busy(String),
}

/// Scripted HID backend
///
/// Devices can be added and removed at runtime to simulate attach/detach.
pub struct MockBackend {
    devices: Mutex<Vec<(HidDeviceInfo, MockEntry)>>,
    enumerate_error: Mutex<Option<BackendError>>,
    open_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(Vec::new()),
            enumerate_error: Mutex::new(None),
            open_calls: AtomicUsize::new(0),
        })
    }

    /// Plug in an openable device
    pub fn add_device(&self, info: HidDeviceInfo, device: Arc<MockDevice>) -> Arc<MockDevice> {
        lock(&self.devices).push((info, MockEntry::Ready(device.clone())));
        device
    }

    /// Plug in a device whose open always fails (held by another process)
    pub fn add_busy_device(&self, info: HidDeviceInfo, reason: &str) {
        lock(&self.devices).push((info, MockEntry::Busy(reason.to_string())));
    }

    /// Unplug every device with this identity; their handles start failing
    pub fn remove_devices(&self, identity: DeviceIdentity) {
        lock(&self.devices).retain(|(info, entry)| {
            if info.identity != identity {
                return true;
            }
            if let MockEntry::Ready(device) = entry {
                device.unplug();
            }
            false
        });
    }

    /// Make enumeration fail (None restores it)
    pub fn fail_enumeration(&self, error: Option<BackendError>) {
        *lock(&self.enumerate_error) = error;
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }
}

impl HidBackend for MockBackend {
    fn enumerate(
        &self,
        filter: Option<DeviceIdentity>,
    ) -> Result<Vec<HidDeviceInfo>, BackendError> {
        if let Some(error) = lock(&self.enumerate_error).clone() {
            return Err(error);
        }
        Ok(lock(&self.devices)
            .iter()
            .map(|(info, _)| info)
            .filter(|info| filter.is_none_or(|id| info.identity == id))
            .cloned()
            .collect())
    }

    fn open(&self, info: &HidDeviceInfo) -> Result<Arc<dyn HidConnection>, BackendError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let devices = lock(&self.devices);
        let (_, entry) = devices
            .iter()
            .find(|(candidate, _)| candidate.path == info.path)
            .ok_or(BackendError::Disconnected)?;

        match entry {
            MockEntry::Ready(device) => Ok(device.clone() as Arc<dyn HidConnection>),
            MockEntry::Busy(reason) => Err(BackendError::Io(reason.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: DeviceIdentity = DeviceIdentity::new(0x303A, 0x8000);

    #[test]
    fn test_create_mock_device_info() {
        let info = create_mock_device_info(ID, 7);
        assert_eq!(info.identity, ID);
        assert_eq!(info.serial_number.as_deref(), Some("SN000007"));
    }

    #[test]
    fn test_firmware_replies_to_sensor_requests() {
        let device = MockDevice::firmware(30.0, 55.0);
        let mut report = vec![0u8; 64];
        report[1] = Opcode::GET_TEMPERATURE;
        device.write(&report).unwrap();

        let mut buf = [0u8; 64];
        let n = device.read_timeout(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf[..4], &[0x41, 0xF0, 0x00, 0x00]);
        assert_eq!(device.writes().len(), 1);
    }

    #[test]
    fn test_silent_device_returns_zero() {
        let device = MockDevice::new();
        let mut buf = [0u8; 8];
        let n = device.read_timeout(&mut buf, Duration::from_millis(5)).unwrap();
        assert_eq!(n, 0);
        assert_eq!(device.read_calls(), 1);
    }

    #[test]
    fn test_backend_busy_and_removal() {
        let backend = MockBackend::new();
        let device = backend.add_device(create_mock_device_info(ID, 1), MockDevice::new());
        backend.add_busy_device(
            create_mock_device_info(DeviceIdentity::new(0x1, 0x2), 2),
            "busy",
        );

        assert_eq!(backend.enumerate(None).unwrap().len(), 2);
        let busy = backend.enumerate(Some(DeviceIdentity::new(0x1, 0x2))).unwrap();
        assert!(matches!(backend.open(&busy[0]), Err(BackendError::Io(_))));

        backend.remove_devices(ID);
        assert!(backend.enumerate(Some(ID)).unwrap().is_empty());
        assert_eq!(device.write(&[0u8; 4]), Err(BackendError::Disconnected));
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await;
        assert!(result.is_err());
    }
}
