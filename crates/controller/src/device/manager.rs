//! Connection manager
//!
//! Owns the single connection to the tracked device, applies hotplug
//! notifications and hands the active handle to the command transport for the
//! duration of one operation.

use async_channel::{Receiver, TryRecvError};
use common::{BackendError, DeviceStatus, HidBackend, HidConnection, HidDeviceInfo, HotplugEvent};
use parking_lot::Mutex;
use protocol::{ConnectError, ConnectionState, DeviceDescriptor, DeviceIdentity};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Reconnect attempts after an attach whose HID interface is not listed yet
///
/// USB arrival is reported before the HID driver binds, so the first
/// enumeration after an attach can miss the device.
pub const ATTACH_RETRIES: u32 = 10;

/// Pause between those attempts
pub const ATTACH_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Queue poll granularity while a reconnect is pending
const RETRY_POLL_SLICE: Duration = Duration::from_millis(10);

/// Whether an attach needs another connect attempt later
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachOutcome {
    Done,
    NotListedYet,
}

/// The open connection plus what we learned about it when it was opened
struct ActiveConnection {
    handle: Arc<dyn HidConnection>,
    descriptor: DeviceDescriptor,
}

/// Hotplug listener thread and the queue it drains
struct Listener {
    events: Receiver<HotplugEvent>,
    thread: JoinHandle<()>,
}

/// Connection manager for one device identity
///
/// State is a short-lived lock around `Option<ActiveConnection>`. It is never
/// held across device I/O; the transport clones the handle out and releases
/// the lock before writing or reading.
pub struct ConnectionManager {
    identity: DeviceIdentity,
    backend: Arc<dyn HidBackend>,
    active: Mutex<Option<ActiveConnection>>,
    listener: Mutex<Option<Listener>>,
    closed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(identity: DeviceIdentity, backend: Arc<dyn HidBackend>) -> Self {
        Self {
            identity,
            backend,
            active: Mutex::new(None),
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    /// Open the tracked device
    ///
    /// No-op when already connected. Every enumerated interface that matches
    /// the identity is tried in order; the first that opens wins.
    pub fn connect(&self) -> Result<(), ConnectError> {
        // Held across enumerate+open so a hotplug attach and an explicit
        // connect cannot both open the device.
        let mut active = self.active.lock();
        if active.is_some() {
            debug!("Device {} already connected", self.identity);
            return Ok(());
        }

        let candidates = self
            .backend
            .enumerate(Some(self.identity))
            .map_err(|e| ConnectError::Backend(e.to_string()))?;

        if candidates.is_empty() {
            debug!("No device matching {} found", self.identity);
            return Err(ConnectError::NotFound {
                identity: self.identity,
            });
        }

        let mut last_error = None;
        for info in &candidates {
            match self.backend.open(info) {
                Ok(handle) => {
                    let descriptor = describe_handle(info, handle.as_ref());
                    info!(
                        "Connected to {} ({}, {}) at {}",
                        self.identity, descriptor.product, descriptor.manufacturer, info.path
                    );
                    *active = Some(ActiveConnection { handle, descriptor });
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to open {} at {}: {}", self.identity, info.path, e);
                    last_error = Some(e);
                }
            }
        }

        Err(ConnectError::OpenFailed {
            identity: self.identity,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no openable interface".to_string()),
        })
    }

    /// A device appeared; reconnect if it is ours and we are disconnected
    ///
    /// Makes one attempt. The hotplug listener retries while the device is
    /// not enumerable yet.
    pub fn on_attach(&self, identity: DeviceIdentity) {
        if self.attach(identity) == AttachOutcome::NotListedYet {
            warn!("Automatic reconnect failed: {} not listed", identity);
        }
    }

    fn attach(&self, identity: DeviceIdentity) -> AttachOutcome {
        if identity != self.identity {
            debug!("Ignoring attach of unrelated device {}", identity);
            return AttachOutcome::Done;
        }
        if self.is_connected() {
            debug!("Attach of {} while connected, nothing to do", identity);
            return AttachOutcome::Done;
        }

        info!("Device {} attached, reconnecting", identity);
        match self.connect() {
            Ok(()) => AttachOutcome::Done,
            Err(ConnectError::NotFound { .. }) => {
                debug!("Device {} attached but not enumerable yet", identity);
                AttachOutcome::NotListedYet
            }
            Err(e) => {
                warn!("Automatic reconnect failed: {}", e);
                AttachOutcome::Done
            }
        }
    }

    /// One delayed reconnect attempt; true when no further attempt is needed
    fn retry_attach(&self, attempts_left: u32) -> bool {
        if self.is_connected() {
            return true;
        }
        match self.connect() {
            Ok(()) => true,
            Err(ConnectError::NotFound { .. }) if attempts_left > 0 => false,
            Err(e) => {
                warn!("Automatic reconnect failed: {}", e);
                true
            }
        }
    }

    /// A device went away; drop our connection if it was ours
    ///
    /// An operation that already cloned the handle keeps it until it finishes.
    pub fn on_detach(&self, identity: DeviceIdentity) {
        if identity != self.identity {
            debug!("Ignoring detach of unrelated device {}", identity);
            return;
        }

        if self.active.lock().take().is_some() {
            info!("Device {} detached, connection dropped", identity);
        } else {
            debug!("Detach of {} while already disconnected", identity);
        }
    }

    pub fn handle_event(&self, event: HotplugEvent) {
        match event {
            HotplugEvent::Attached { identity } => self.on_attach(identity),
            HotplugEvent::Detached { identity } => self.on_detach(identity),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Descriptor of the connected device, or placeholders when disconnected
    pub fn describe(&self) -> DeviceDescriptor {
        match self.active.lock().as_ref() {
            Some(conn) => conn.descriptor.clone(),
            None => DeviceDescriptor::new(self.identity, None, None),
        }
    }

    pub fn status(&self) -> DeviceStatus {
        let active = self.active.lock();
        DeviceStatus {
            identity: self.identity,
            state: if active.is_some() {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            },
            descriptor: active.as_ref().map(|conn| conn.descriptor.clone()),
        }
    }

    /// Every attached HID device, not only the tracked one
    pub fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, ConnectError> {
        let devices = self
            .backend
            .enumerate(None)
            .map_err(|e| ConnectError::Backend(e.to_string()))?;
        debug!("Enumerated {} HID devices", devices.len());
        Ok(devices.iter().map(HidDeviceInfo::descriptor).collect())
    }

    /// Borrow the active handle for one operation
    pub(crate) fn active(&self) -> Option<Arc<dyn HidConnection>> {
        self.active.lock().as_ref().map(|conn| conn.handle.clone())
    }

    /// Whether `handle` is still the connection we hold
    pub(crate) fn is_active(&self, handle: &Arc<dyn HidConnection>) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|conn| Arc::ptr_eq(&conn.handle, handle))
    }

    /// Drop `handle` after a fatal I/O error, unless it was already replaced
    pub(crate) fn mark_lost(&self, handle: &Arc<dyn HidConnection>, cause: &BackendError) {
        let mut active = self.active.lock();
        if active
            .as_ref()
            .is_some_and(|conn| Arc::ptr_eq(&conn.handle, handle))
        {
            *active = None;
            warn!("Connection to {} lost: {}", self.identity, cause);
        }
    }

    /// Drain hotplug notifications on a dedicated thread
    ///
    /// Replaces any listener started earlier.
    pub fn spawn_hotplug_listener(
        self: &Arc<Self>,
        events: Receiver<HotplugEvent>,
    ) -> common::Result<()> {
        self.stop_listener();
        self.closed.store(false, Ordering::SeqCst);

        let manager = Arc::downgrade(self);
        let queue = events.clone();
        let thread = std::thread::Builder::new()
            .name("hotplug-listener".to_string())
            .spawn(move || run_listener(manager, queue))?;

        *self.listener.lock() = Some(Listener { events, thread });
        Ok(())
    }

    fn stop_listener(&self) {
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.events.close();
            if listener.thread.thread().id() == std::thread::current().id() {
                return;
            }
            if let Err(e) = listener.thread.join() {
                error!("Hotplug listener thread panicked: {:?}", e);
            }
        }
    }

    /// Close the connection and stop listening for hotplug events
    ///
    /// Safe to call more than once.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stop_listener();

        if self.active.lock().take().is_some() {
            info!("Connection to {} closed", self.identity);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.events.close();
        }
    }
}

/// Drain hotplug events, retrying a pending reconnect between them
///
/// Any event for the device cancels a pending retry; a detach in particular
/// means the interface we were waiting for is gone again.
fn run_listener(manager: Weak<ConnectionManager>, queue: Receiver<HotplugEvent>) {
    debug!("Hotplug listener started");
    // Attempts left for the last attach, if it is still pending
    let mut pending: Option<u32> = None;

    loop {
        let event = match pending {
            None => match queue.recv_blocking() {
                Ok(event) => Some(event),
                Err(_) => break,
            },
            Some(_) => match next_event_within(&queue, ATTACH_RETRY_DELAY) {
                Ok(event) => event,
                Err(()) => break,
            },
        };

        let Some(manager) = manager.upgrade() else {
            break;
        };
        if manager.closed.load(Ordering::SeqCst) {
            break;
        }

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| match event {
            Some(event) if event.identity() != manager.identity => {
                manager.handle_event(event);
                pending
            }
            Some(HotplugEvent::Attached { identity }) => match manager.attach(identity) {
                AttachOutcome::NotListedYet => Some(ATTACH_RETRIES),
                AttachOutcome::Done => None,
            },
            Some(event) => {
                manager.handle_event(event);
                None
            }
            None => {
                let left = pending.unwrap_or(0).saturating_sub(1);
                if manager.retry_attach(left) {
                    None
                } else {
                    Some(left)
                }
            }
        }));

        pending = match result {
            Ok(next) => next,
            Err(e) => {
                error!("Panic while handling {:?}: {:?}", event, e);
                None
            }
        };
    }
    debug!("Hotplug listener stopped");
}

/// Wait up to `wait` for the next event; `Ok(None)` when none arrived
fn next_event_within(
    queue: &Receiver<HotplugEvent>,
    wait: Duration,
) -> Result<Option<HotplugEvent>, ()> {
    let deadline = Instant::now() + wait;
    loop {
        match queue.try_recv() {
            Ok(event) => return Ok(Some(event)),
            Err(TryRecvError::Closed) => return Err(()),
            Err(TryRecvError::Empty) => {}
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        std::thread::sleep(remaining.min(RETRY_POLL_SLICE));
    }
}

fn describe_handle(info: &HidDeviceInfo, handle: &dyn HidConnection) -> DeviceDescriptor {
    DeviceDescriptor::new(
        info.identity,
        handle.product_string().or_else(|| info.product.clone()),
        handle
            .manufacturer_string()
            .or_else(|| info.manufacturer.clone()),
    )
    .with_serial(info.serial_number.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MockBackend, MockDevice, create_mock_device_info};

    const ID: DeviceIdentity = DeviceIdentity::new(0x303A, 0x8000);
    const OTHER: DeviceIdentity = DeviceIdentity::new(0x046D, 0xC52B);

    fn manager_with(backend: &Arc<MockBackend>) -> ConnectionManager {
        ConnectionManager::new(ID, backend.clone())
    }

    #[test]
    fn test_connect_not_found() {
        let backend = MockBackend::new();
        let manager = manager_with(&backend);

        assert_eq!(
            manager.connect(),
            Err(ConnectError::NotFound { identity: ID })
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_busy_is_open_failed() {
        let backend = MockBackend::new();
        backend.add_busy_device(create_mock_device_info(ID, 1), "Device or resource busy");
        let manager = manager_with(&backend);

        match manager.connect() {
            Err(ConnectError::OpenFailed { identity, reason }) => {
                assert_eq!(identity, ID);
                assert!(reason.contains("busy"));
            }
            other => panic!("expected OpenFailed, got {:?}", other),
        }
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_connect_twice_opens_once() {
        let backend = MockBackend::new();
        backend.add_device(create_mock_device_info(ID, 1), MockDevice::new());
        let manager = manager_with(&backend);

        manager.connect().unwrap();
        manager.connect().unwrap();
        assert_eq!(backend.open_calls(), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_connect_skips_busy_interface() {
        let backend = MockBackend::new();
        backend.add_busy_device(create_mock_device_info(ID, 1), "busy");
        backend.add_device(create_mock_device_info(ID, 2), MockDevice::new());
        let manager = manager_with(&backend);

        assert!(manager.connect().is_ok());
        assert_eq!(backend.open_calls(), 2);
    }

    #[test]
    fn test_enumeration_failure() {
        let backend = MockBackend::new();
        backend.fail_enumeration(Some(BackendError::Io("hidapi init".to_string())));
        let manager = manager_with(&backend);

        assert!(matches!(manager.connect(), Err(ConnectError::Backend(_))));
        assert!(manager.list_devices().is_err());
    }

    #[test]
    fn test_describe_prefers_handle_strings() {
        let backend = MockBackend::new();
        backend.add_device(create_mock_device_info(ID, 1), MockDevice::new());
        let manager = manager_with(&backend);

        assert_eq!(manager.describe().product, "Unknown");

        manager.connect().unwrap();
        let desc = manager.describe();
        assert_eq!(desc.product, "Mock HID");
        assert_eq!(desc.manufacturer, "Mock Vendor");
        assert_eq!(desc.serial_number.as_deref(), Some("SN000001"));
    }

    #[test]
    fn test_describe_falls_back_to_enumeration_strings() {
        let backend = MockBackend::new();
        let mut info = create_mock_device_info(ID, 4);
        info.manufacturer = None;
        backend.add_device(info, MockDevice::anonymous());
        let manager = manager_with(&backend);

        manager.connect().unwrap();
        let desc = manager.describe();
        assert_eq!(desc.product, "Test Product 4");
        assert_eq!(desc.manufacturer, "Unknown");
    }

    #[test]
    fn test_detach_unrelated_identity_keeps_state() {
        let backend = MockBackend::new();
        backend.add_device(create_mock_device_info(ID, 1), MockDevice::new());
        let manager = manager_with(&backend);
        manager.connect().unwrap();

        manager.on_detach(OTHER);
        assert!(manager.is_connected());

        manager.on_detach(ID);
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_attach_reconnects_only_matching() {
        let backend = MockBackend::new();
        backend.add_device(create_mock_device_info(ID, 1), MockDevice::new());
        let manager = manager_with(&backend);

        manager.on_attach(OTHER);
        assert!(!manager.is_connected());
        assert_eq!(backend.open_calls(), 0);

        manager.on_attach(ID);
        assert!(manager.is_connected());

        // Already connected: no second open
        manager.on_attach(ID);
        assert_eq!(backend.open_calls(), 1);
    }

    #[test]
    fn test_mark_lost_ignores_stale_handle() {
        let backend = MockBackend::new();
        backend.add_device(create_mock_device_info(ID, 1), MockDevice::new());
        let manager = manager_with(&backend);

        manager.connect().unwrap();
        let stale = manager.active().unwrap();
        manager.on_detach(ID);
        manager.connect().unwrap();

        manager.mark_lost(&stale, &BackendError::Disconnected);
        assert!(manager.is_connected());
        assert!(!manager.is_active(&stale));

        let current = manager.active().unwrap();
        manager.mark_lost(&current, &BackendError::Disconnected);
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_status_snapshot() {
        let backend = MockBackend::new();
        backend.add_device(create_mock_device_info(ID, 1), MockDevice::new());
        let manager = manager_with(&backend);

        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.descriptor.is_none());

        manager.connect().unwrap();
        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.descriptor.unwrap().identity, ID);
    }

    #[test]
    fn test_close_is_idempotent() {
        let backend = MockBackend::new();
        backend.add_device(create_mock_device_info(ID, 1), MockDevice::new());
        let manager = manager_with(&backend);
        manager.connect().unwrap();

        manager.close();
        assert!(!manager.is_connected());
        manager.close();
        assert!(!manager.is_connected());
    }
}
