//! Interactive menu
//!
//! Parses one input line into a [`MenuCommand`], runs it through the
//! [`DeviceBridge`] and renders the outcome as text lines. Nothing here prints;
//! the binary owns the terminal.

use common::{DeviceBridge, DeviceStatus};
use protocol::{
    ConnectError, ConnectionState, DeviceDescriptor, LedColor, Opcode, SensorKind,
    SensorObservation, TransportError,
};
use std::time::Duration;
use thiserror::Error;

/// One parsed menu entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuCommand {
    ClearConsole,
    SystemInfo,
    MouseClick,
    /// `None` uses the configured default colour
    SetLed(Option<LedColor>),
    Temperature,
    Humidity,
    AllSensors,
    BatchDemo,
    Custom { opcode: u8, payload: Vec<u8> },
    List,
    Status,
    Connect,
    Help,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MenuError {
    #[error("Unknown command: {0} (type 'help' for the menu)")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid byte value '{0}', expected 0-255 or 0x00-0xFF")]
    InvalidByte(String),
}

const LED_USAGE: &str = "4 [red green blue]";
const CUSTOM_USAGE: &str = "9 <opcode> [byte ...]";

/// Parse one input line; `Ok(None)` for a blank line
pub fn parse_command(line: &str) -> Result<Option<MenuCommand>, MenuError> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match head.to_lowercase().as_str() {
        "1" => MenuCommand::ClearConsole,
        "2" => MenuCommand::SystemInfo,
        "3" => MenuCommand::MouseClick,
        "4" => match args.as_slice() {
            [] => MenuCommand::SetLed(None),
            [r, g, b] => MenuCommand::SetLed(Some(LedColor::new(
                parse_byte(r)?,
                parse_byte(g)?,
                parse_byte(b)?,
            ))),
            _ => return Err(MenuError::Usage(LED_USAGE)),
        },
        "5" => MenuCommand::Temperature,
        "6" => MenuCommand::Humidity,
        "7" => MenuCommand::AllSensors,
        "8" => MenuCommand::BatchDemo,
        "9" => {
            let (opcode, rest) = args.split_first().ok_or(MenuError::Usage(CUSTOM_USAGE))?;
            MenuCommand::Custom {
                opcode: parse_byte(opcode)?,
                payload: rest.iter().map(|b| parse_byte(b)).collect::<Result<_, _>>()?,
            }
        }
        "list" => MenuCommand::List,
        "status" => MenuCommand::Status,
        "connect" => MenuCommand::Connect,
        "help" | "h" => MenuCommand::Help,
        "exit" | "quit" => MenuCommand::Exit,
        other => return Err(MenuError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// Decimal `0`-`255` or hex `0x00`-`0xFF`
fn parse_byte(text: &str) -> Result<u8, MenuError> {
    let parsed = match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse::<u8>(),
    };
    parsed.map_err(|_| MenuError::InvalidByte(text.to_string()))
}

pub fn help_lines() -> Vec<String> {
    [
        "Available commands:",
        "  1                 - Clear device console",
        "  2                 - Show device system info",
        "  3                 - Mouse click",
        "  4 [r g b]         - Set LED colour (default from config)",
        "  5                 - Read temperature",
        "  6                 - Read humidity",
        "  7                 - Read all sensors",
        "  8                 - Run batch command demo",
        "  9 <op> [bytes..]  - Send custom command",
        "  list              - List attached HID devices",
        "  status            - Show connection status",
        "  connect           - Connect to the device",
        "  help              - Show this help",
        "  exit              - Quit",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// `Sensors - temperature: 23.5°C, humidity: 41.0%`
pub fn render_observation(observation: &SensorObservation) -> String {
    let parts: Vec<String> = observation
        .readings
        .iter()
        .map(|r| format!("{}: {:.1}{}", r.kind, r.value, r.kind.unit()))
        .collect();
    format!("Sensors - {}", parts.join(", "))
}

pub fn render_reading(kind: SensorKind, value: Option<f32>) -> String {
    match value {
        Some(v) => format!("{}: {:.1}{}", kind, v, kind.unit()),
        None => format!("{}: no reading", kind),
    }
}

/// Operator-facing connect failure; each case calls for a different fix
pub fn render_connect_error(err: &ConnectError) -> String {
    match err {
        ConnectError::NotFound { identity } => format!(
            "Device {} not found. Is it plugged in? Use 'list' to see attached devices.",
            identity
        ),
        ConnectError::OpenFailed { identity, reason } => format!(
            "Device {} found but could not be opened (busy or permission denied): {}",
            identity, reason
        ),
        ConnectError::Backend(reason) => format!("HID subsystem error: {}", reason),
    }
}

pub fn render_transport_error(err: &TransportError) -> String {
    match err {
        TransportError::NotConnected => {
            "Device not connected. Plug it in or type 'connect'.".to_string()
        }
        TransportError::Timeout { timeout } => format!(
            "Timed out after {}ms waiting for the device to respond",
            timeout.as_millis()
        ),
        other => other.to_string(),
    }
}

pub fn render_status(status: &DeviceStatus) -> Vec<String> {
    let mut lines = vec![format!("Connection: {}", status.state)];
    match (&status.descriptor, status.state) {
        (Some(desc), ConnectionState::Connected) => lines.push(format!(
            "Device: {}, {} ({})",
            desc.product, desc.manufacturer, desc.identity
        )),
        _ => lines.push(format!("Device: none (watching {})", status.identity)),
    }
    lines
}

pub fn render_device_list(devices: &[DeviceDescriptor]) -> Vec<String> {
    if devices.is_empty() {
        return vec!["No HID devices found.".to_string()];
    }
    let mut lines = vec![format!("Found {} HID device(s):", devices.len())];
    for device in devices {
        let mut line = format!(
            "  VID: 0x{:04X} | PID: 0x{:04X} | Product: {:<30} | Manufacturer: {}",
            device.identity.vendor_id,
            device.identity.product_id,
            device.product,
            device.manufacturer
        );
        if let Some(serial) = &device.serial_number {
            line.push_str(&format!(" | Serial: {}", serial));
        }
        lines.push(line);
    }
    lines
}

fn render_sent(what: &str, result: Result<(), TransportError>) -> String {
    match result {
        Ok(()) => format!("{}: ok", what),
        Err(e) => format!("{}: failed - {}", what, render_transport_error(&e)),
    }
}

/// Executes menu commands against the device worker
pub struct Menu {
    bridge: DeviceBridge,
    default_led: LedColor,
    /// Base pause between batch demo steps
    batch_pause: Duration,
}

impl Menu {
    pub fn new(bridge: DeviceBridge, default_led: LedColor) -> Self {
        Self {
            bridge,
            default_led,
            batch_pause: Duration::from_millis(500),
        }
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    /// Run one command and return the lines to show
    ///
    /// Device failures are rendered; only a dead worker is an error.
    pub async fn execute(&self, command: MenuCommand) -> common::Result<Vec<String>> {
        let lines = match command {
            MenuCommand::ClearConsole => {
                vec![self.send("Clear console", Opcode::ClearConsole, vec![]).await?]
            }
            MenuCommand::SystemInfo => {
                vec![self.send("Show system info", Opcode::ShowSystemInfo, vec![]).await?]
            }
            MenuCommand::MouseClick => {
                vec![self.send("Mouse click", Opcode::MouseClick, vec![]).await?]
            }
            MenuCommand::SetLed(color) => {
                let color = color.unwrap_or(self.default_led);
                let what = format!("Set LED RGB({}, {}, {})", color.red, color.green, color.blue);
                vec![self.send(&what, Opcode::SetLedColor, color.to_payload().to_vec()).await?]
            }
            MenuCommand::Temperature => vec![self.reading(SensorKind::Temperature).await?],
            MenuCommand::Humidity => vec![self.reading(SensorKind::Humidity).await?],
            MenuCommand::AllSensors => {
                let mut lines = vec!["Sensor data:".to_string()];
                for kind in SensorKind::ALL {
                    lines.push(format!("  {}", self.reading(kind).await?));
                }
                lines
            }
            MenuCommand::BatchDemo => self.batch_demo().await?,
            MenuCommand::Custom { opcode, payload } => {
                let what = format!("Custom command 0x{:02X}", opcode);
                vec![self.send(&what, Opcode::from_byte(opcode), payload).await?]
            }
            MenuCommand::List => match self.bridge.list_devices().await? {
                Ok(devices) => render_device_list(&devices),
                Err(e) => vec![render_connect_error(&e)],
            },
            MenuCommand::Status => render_status(&self.bridge.status().await?),
            MenuCommand::Connect => match self.bridge.connect().await? {
                Ok(()) => render_status(&self.bridge.status().await?),
                Err(e) => vec![render_connect_error(&e)],
            },
            MenuCommand::Help => help_lines(),
            MenuCommand::Exit => Vec::new(),
        };
        Ok(lines)
    }

    async fn send(&self, what: &str, opcode: Opcode, payload: Vec<u8>) -> common::Result<String> {
        let result = self.bridge.send(opcode, payload).await?;
        Ok(render_sent(what, result))
    }

    async fn reading(&self, kind: SensorKind) -> common::Result<String> {
        let value = self.bridge.read_sensor(kind).await?;
        Ok(render_reading(kind, value))
    }

    /// Clear, info, red, green, blue, off with pauses in between
    async fn batch_demo(&self) -> common::Result<Vec<String>> {
        let steps: [(&str, Opcode, Vec<u8>, u32); 6] = [
            ("1. Clear console", Opcode::ClearConsole, vec![], 1),
            ("2. Show system info", Opcode::ShowSystemInfo, vec![], 1),
            ("3. LED red", Opcode::SetLedColor, vec![255, 0, 0], 2),
            ("4. LED green", Opcode::SetLedColor, vec![0, 255, 0], 2),
            ("5. LED blue", Opcode::SetLedColor, vec![0, 0, 255], 2),
            ("6. LED off", Opcode::SetLedColor, vec![0, 0, 0], 0),
        ];

        let mut lines = vec!["Running batch command demo...".to_string()];
        for (what, opcode, payload, pauses) in steps {
            lines.push(self.send(what, opcode, payload).await?);
            if pauses > 0 {
                tokio::time::sleep(self.batch_pause * pauses).await;
            }
        }
        lines.push("Batch demo complete".to_string());
        Ok(lines)
    }
}
