//! HID device controller
//!
//! Talks to a microcontroller presenting itself as a USB HID device:
//! - [`device`]: connection lifecycle, command transport and the threads
//!   that feed them (hotplug watcher, device worker)
//! - [`poller`]: periodic sensor sampling
//! - [`config`]: TOML configuration
//! - [`cli`]: the interactive menu used by the `hid-controller` binary

pub mod cli;
pub mod config;
pub mod device;
pub mod poller;

pub use config::ControllerConfig;
pub use device::{CommandTransport, ConnectionManager, TransportSettings};
pub use poller::{PollerHandle, PollerSettings, SensorPoller, SensorSource};
