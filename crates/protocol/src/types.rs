//! Device and protocol type definitions
//!
//! Identity, sensor and descriptor types shared by the controller and its
//! front-ends, plus the typed failures returned by connection and transport
//! operations.

use crate::{Opcode, ProtocolError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Placeholder used when the device does not report a descriptor string
pub const UNKNOWN: &str = "Unknown";

/// USB identity of the tracked device
///
/// Fixed for the lifetime of a controller; used to match enumeration results
/// and hotplug notifications across attach/detach cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
}

impl DeviceIdentity {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Check a raw VID/PID pair against this identity
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl Default for DeviceIdentity {
    /// Espressif VID with the firmware's default PID
    fn default() -> Self {
        Self::new(0x303A, 0x8000)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Rejected `VID:PID` string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid device identity '{0}', expected VID:PID (e.g. '0x303A:0x8000')")]
pub struct InvalidIdentity(pub String);

impl FromStr for DeviceIdentity {
    type Err = InvalidIdentity;

    /// Parse `0x303A:0x8000` or `303a:8000`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vid, pid) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| InvalidIdentity(s.to_string()))?;
        let parse = |part: &str| {
            let hex = part
                .trim()
                .trim_start_matches("0x")
                .trim_start_matches("0X");
            u16::from_str_radix(hex, 16).map_err(|_| InvalidIdentity(s.to_string()))
        };
        Ok(Self::new(parse(vid)?, parse(pid)?))
    }
}

/// Connection state of the tracked device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Human-facing description of a device
///
/// String fields are best effort; missing values become [`UNKNOWN`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub identity: DeviceIdentity,
    pub product: String,
    pub manufacturer: String,
    /// Serial number string (if available)
    pub serial_number: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(
        identity: DeviceIdentity,
        product: Option<String>,
        manufacturer: Option<String>,
    ) -> Self {
        Self {
            identity,
            product: non_empty_or_unknown(product),
            manufacturer: non_empty_or_unknown(manufacturer),
            serial_number: None,
        }
    }

    pub fn with_serial(mut self, serial_number: Option<String>) -> Self {
        self.serial_number = serial_number.filter(|s| !s.is_empty());
        self
    }
}

fn non_empty_or_unknown(value: Option<String>) -> String {
    value
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Onboard sensors the firmware exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorKind {
    Temperature,
    Humidity,
}

impl SensorKind {
    /// Sampling order used by the poller
    pub const ALL: [SensorKind; 2] = [SensorKind::Temperature, SensorKind::Humidity];

    /// Request opcode for this sensor
    pub fn opcode(self) -> Opcode {
        match self {
            SensorKind::Temperature => Opcode::GetTemperature,
            SensorKind::Humidity => Opcode::GetHumidity,
        }
    }

    /// Display unit
    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Temperature => write!(f, "temperature"),
            SensorKind::Humidity => write!(f, "humidity"),
        }
    }
}

/// One fresh sensor value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub kind: SensorKind,
    pub value: f32,
}

/// Readings produced by one poller tick
///
/// Only emitted when at least one sensor answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorObservation {
    pub at: SystemTime,
    pub readings: Vec<SensorReading>,
}

impl SensorObservation {
    pub fn get(&self, kind: SensorKind) -> Option<f32> {
        self.readings
            .iter()
            .find(|r| r.kind == kind)
            .map(|r| r.value)
    }
}

/// RGB value for [`Opcode::SetLedColor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl LedColor {
    pub const OFF: LedColor = LedColor::new(0, 0, 0);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Command payload, `[r, g, b]`
    pub fn to_payload(self) -> [u8; 3] {
        [self.red, self.green, self.blue]
    }
}

/// Connect failure
///
/// `NotFound` and `OpenFailed` call for different operator action (plug the
/// device in vs. free it or fix permissions), so they stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// No attached device matches the identity
    #[error("Device {identity} not found")]
    NotFound { identity: DeviceIdentity },

    /// A matching device exists but could not be opened (busy, permissions)
    #[error("Failed to open device {identity}: {reason}")]
    OpenFailed {
        identity: DeviceIdentity,
        reason: String,
    },

    /// Enumeration itself failed
    #[error("HID backend error: {0}")]
    Backend(String),
}

/// Command transport failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No active connection, or it was lost during the operation
    #[error("Device not connected")]
    NotConnected,

    /// Underlying write reported an error or an incomplete report
    #[error("Write failed: {reason}")]
    WriteFailed { reason: String },

    /// Underlying read reported an error
    #[error("Read failed: {reason}")]
    ReadFailed { reason: String },

    /// No report arrived before the deadline
    #[error("Timed out after {}ms waiting for response", timeout.as_millis())]
    Timeout { timeout: Duration },

    /// Response too short for the expected value
    #[error("Short read: needed {needed} bytes, got {actual}")]
    ShortRead { needed: usize, actual: usize },

    /// Payload rejected by the codec before anything was written
    #[error("Payload too large: {len} bytes (max: {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// Configured report size cannot carry a command
    #[error("Invalid report size: {size} (min: {min})")]
    InvalidReportSize { size: usize, min: usize },
}

impl From<ProtocolError> for TransportError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::PayloadTooLarge { len, max } => {
                TransportError::PayloadTooLarge { len, max }
            }
            ProtocolError::ShortRead { needed, actual } => {
                TransportError::ShortRead { needed, actual }
            }
            ProtocolError::InvalidReportSize { size, min } => {
                TransportError::InvalidReportSize { size, min }
            }
        }
    }
}
