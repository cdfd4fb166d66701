//! Command transport
//!
//! The only code that performs I/O on the device. One guard serializes every
//! encode/write/read sequence so a response can only belong to the request
//! that preceded it.

use crate::device::manager::ConnectionManager;
use bytes::Bytes;
use common::{BackendError, HidConnection};
use parking_lot::Mutex;
use protocol::{
    DEFAULT_REPORT_SIZE, LedColor, Opcode, SensorKind, TransportError, decode_f32_be, encode,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Fixed wait for a sensor reply
pub const SENSOR_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default wait for a command reply
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Stand-in deadline for timeouts too large to add to the current instant
const FAR_DEADLINE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Transport tuning resolved from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// Frame size in bytes, report id included
    pub report_size: usize,
    /// Wait used by [`CommandTransport::exchange`]
    pub timeout: Duration,
    /// Log every frame's opcode and payload length
    pub log_commands: bool,
    /// Hex-dump every response
    pub show_raw_data: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            report_size: DEFAULT_REPORT_SIZE,
            timeout: DEFAULT_TIMEOUT,
            log_commands: false,
            show_raw_data: false,
        }
    }
}

/// Single-in-flight command transport over the manager's active connection
pub struct CommandTransport {
    manager: Arc<ConnectionManager>,
    settings: TransportSettings,
    /// Held for one whole encode/write/read sequence
    io: Mutex<()>,
}

impl CommandTransport {
    pub fn new(manager: Arc<ConnectionManager>, settings: TransportSettings) -> Self {
        Self {
            manager,
            settings,
            io: Mutex::new(()),
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Encode and write one frame; no reply is read
    pub fn send_command(&self, opcode: Opcode, payload: &[u8]) -> Result<(), TransportError> {
        let _io = self.io.lock();
        let conn = self.connection()?;
        self.write_frame(&conn, opcode, payload)
    }

    /// Wait up to `timeout` for one report from the device
    pub fn read_response(&self, timeout: Duration) -> Result<Bytes, TransportError> {
        let _io = self.io.lock();
        let conn = self.connection()?;
        self.read_report(&conn, timeout)
    }

    /// Write a command then read one report under the same guard
    ///
    /// The protocol has no correlation id; the report read here is taken to be
    /// the reply to this command. A failed write skips the read.
    pub fn send_command_with_response(
        &self,
        opcode: Opcode,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let _io = self.io.lock();
        let conn = self.connection()?;
        self.write_frame(&conn, opcode, payload)?;
        self.read_report(&conn, timeout)
    }

    /// [`send_command_with_response`](Self::send_command_with_response) with the configured timeout
    pub fn exchange(&self, opcode: Opcode, payload: &[u8]) -> Result<Bytes, TransportError> {
        self.send_command_with_response(opcode, payload, self.settings.timeout)
    }

    /// Request one sensor value
    pub fn sample(&self, kind: SensorKind) -> Result<f32, TransportError> {
        let reply = self.send_command_with_response(kind.opcode(), &[], SENSOR_TIMEOUT)?;
        Ok(decode_f32_be(&reply)?)
    }

    /// One sensor value, or `None` on any failure
    pub fn read_sensor(&self, kind: SensorKind) -> Option<f32> {
        match self.sample(kind) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("No {} reading: {}", kind, e);
                None
            }
        }
    }

    pub fn get_temperature(&self) -> Option<f32> {
        self.read_sensor(SensorKind::Temperature)
    }

    pub fn get_humidity(&self) -> Option<f32> {
        self.read_sensor(SensorKind::Humidity)
    }

    pub fn clear_console(&self) -> Result<(), TransportError> {
        self.send_command(Opcode::ClearConsole, &[])
    }

    pub fn show_system_info(&self) -> Result<(), TransportError> {
        self.send_command(Opcode::ShowSystemInfo, &[])
    }

    pub fn mouse_click(&self) -> Result<(), TransportError> {
        self.send_command(Opcode::MouseClick, &[])
    }

    pub fn set_led_color(&self, color: LedColor) -> Result<(), TransportError> {
        self.send_command(Opcode::SetLedColor, &color.to_payload())
    }

    pub fn reset_device(&self) -> Result<(), TransportError> {
        self.send_command(Opcode::ResetDevice, &[])
    }

    fn connection(&self) -> Result<Arc<dyn HidConnection>, TransportError> {
        self.manager.active().ok_or(TransportError::NotConnected)
    }

    fn write_frame(
        &self,
        conn: &Arc<dyn HidConnection>,
        opcode: Opcode,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let frame = encode(opcode, payload, self.settings.report_size)?;

        if self.settings.log_commands {
            debug!("Sending {} with {} payload bytes", opcode, payload.len());
        }

        match conn.write(frame.as_bytes()) {
            Ok(written) if written >= frame.len() => {
                trace!("Wrote {} bytes", written);
                Ok(())
            }
            Ok(written) => Err(TransportError::WriteFailed {
                reason: format!("incomplete write: {} of {} bytes", written, frame.len()),
            }),
            Err(BackendError::Disconnected) => {
                self.manager.mark_lost(conn, &BackendError::Disconnected);
                Err(TransportError::NotConnected)
            }
            Err(e) => Err(TransportError::WriteFailed {
                reason: e.to_string(),
            }),
        }
    }

    /// Deadline-bound read; never returns `Timeout` before `timeout` elapsed
    fn read_report(
        &self,
        conn: &Arc<dyn HidConnection>,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + FAR_DEADLINE);
        let mut buf = vec![0u8; self.settings.report_size];

        let result = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break Err(TransportError::Timeout { timeout });
            }

            match conn.read_timeout(&mut buf, remaining) {
                Ok(0) => {
                    // Backends may return early with nothing; keep waiting
                    // unless the connection was dropped meanwhile.
                    if !self.manager.is_active(conn) {
                        break Err(TransportError::NotConnected);
                    }
                }
                Ok(n) => {
                    buf.truncate(n);
                    break Ok(Bytes::from(buf));
                }
                Err(BackendError::Disconnected) => {
                    self.manager.mark_lost(conn, &BackendError::Disconnected);
                    break Err(TransportError::NotConnected);
                }
                Err(e) => {
                    break Err(TransportError::ReadFailed {
                        reason: e.to_string(),
                    });
                }
            }
        };

        // A detach during the wait surfaces as NotConnected once the read resolves
        if !self.manager.is_active(conn) {
            return Err(TransportError::NotConnected);
        }

        if let Ok(reply) = &result
            && self.settings.show_raw_data
        {
            debug!("Response ({} bytes): {}", reply.len(), hex_dump(reply));
        }
        result
    }
}

fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MockBackend, MockDevice, create_mock_device_info};
    use protocol::DeviceIdentity;

    const ID: DeviceIdentity = DeviceIdentity::new(0x303A, 0x8000);

    fn connected(device: Arc<MockDevice>) -> CommandTransport {
        let backend = MockBackend::new();
        backend.add_device(create_mock_device_info(ID, 1), device);
        let manager = Arc::new(ConnectionManager::new(ID, backend));
        manager.connect().unwrap();
        CommandTransport::new(manager, TransportSettings::default())
    }

    #[test]
    fn test_not_connected() {
        let manager = Arc::new(ConnectionManager::new(ID, MockBackend::new()));
        let transport = CommandTransport::new(manager, TransportSettings::default());

        assert_eq!(
            transport.send_command(Opcode::ClearConsole, &[]),
            Err(TransportError::NotConnected)
        );
        assert_eq!(
            transport.read_response(Duration::from_millis(10)),
            Err(TransportError::NotConnected)
        );
        assert_eq!(transport.get_temperature(), None);
    }

    #[test]
    fn test_oversized_payload_writes_nothing() {
        let device = MockDevice::new();
        let transport = connected(device.clone());

        let result = transport.send_command(Opcode::Custom(0x10), &[0u8; 63]);
        assert_eq!(
            result,
            Err(TransportError::PayloadTooLarge { len: 63, max: 62 })
        );
        assert!(device.writes().is_empty());
    }

    #[test]
    fn test_write_error_skips_read() {
        let device = MockDevice::new();
        device.fail_writes(Some(BackendError::Io("pipe error".to_string())));
        let transport = connected(device.clone());

        let result =
            transport.send_command_with_response(Opcode::GetHumidity, &[], Duration::from_secs(1));
        assert!(matches!(result, Err(TransportError::WriteFailed { .. })));
        assert_eq!(device.read_calls(), 0);
    }

    #[test]
    fn test_short_reply_is_no_reading() {
        let device = MockDevice::new();
        device.set_responder(|_| Some(vec![0x41, 0xF0]));
        let transport = connected(device);

        assert_eq!(
            transport.sample(SensorKind::Temperature),
            Err(TransportError::ShortRead {
                needed: 4,
                actual: 2
            })
        );
        assert_eq!(transport.get_temperature(), None);
    }

    #[test]
    fn test_named_commands_use_their_opcodes() {
        let device = MockDevice::new();
        let transport = connected(device.clone());

        transport.clear_console().unwrap();
        transport.show_system_info().unwrap();
        transport.mouse_click().unwrap();
        transport.reset_device().unwrap();

        let opcodes: Vec<u8> = device.writes().iter().map(|w| w[1]).collect();
        assert_eq!(opcodes, vec![0x01, 0x02, 0x03, 0xFF]);
    }

    #[test]
    fn test_disconnected_write_drops_connection() {
        let device = MockDevice::new();
        let transport = connected(device.clone());

        device.unplug();
        assert_eq!(
            transport.mouse_click(),
            Err(TransportError::NotConnected)
        );
        assert!(!transport.manager().is_connected());
    }

    #[test]
    fn test_read_error_is_read_failed() {
        let device = MockDevice::new();
        device.push_read_error(BackendError::Io("overflow".to_string()));
        let transport = connected(device);

        assert_eq!(
            transport.read_response(Duration::from_millis(100)),
            Err(TransportError::ReadFailed {
                reason: "overflow".to_string()
            })
        );
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x41, 0xF0, 0x00, 0x0a]), "41 f0 00 0a");
        assert_eq!(hex_dump(&[]), "");
    }
}
