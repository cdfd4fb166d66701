//! Common utilities for hid-controller
//!
//! This crate provides shared functionality between the controller library and
//! its binary: the HID capability traits, error handling, logging setup and the
//! async channel bridge for device thread communication.

pub mod channel;
pub mod error;
pub mod hid;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use channel::{
    DeviceBridge, DeviceCommand, DeviceStatus, DeviceWorker, HotplugEvent, create_device_bridge,
    create_hotplug_channel,
};
pub use error::{Error, Result};
pub use hid::{BackendError, HidBackend, HidConnection, HidDeviceInfo};
pub use logging::{effective_level, setup_logging};
