//! Device subsystem
//!
//! Connection lifecycle, command transport and the threads that feed them:
//! - [`ConnectionManager`] keeps the single connection to the tracked device
//! - [`CommandTransport`] performs all device I/O, one exchange at a time
//! - [`HidapiBackend`] is the native HID access layer
//! - [`HotplugWatcher`] turns libusb hotplug callbacks into queued events
//! - the device worker serves async callers through the command bridge

pub mod hidapi_backend;
pub mod hotplug;
pub mod manager;
pub mod transport;
pub mod worker;

// Re-export public types
pub use hidapi_backend::{HidapiBackend, HidapiConnection};
pub use hotplug::HotplugWatcher;
pub use manager::ConnectionManager;
pub use transport::{CommandTransport, SENSOR_TIMEOUT, TransportSettings};
pub use worker::{DeviceWorkerThread, spawn_device_worker};
