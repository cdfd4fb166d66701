//! Command opcodes
//!
//! The opcode is the second byte of every command report. Values are fixed by
//! the device firmware; anything outside the named table travels as
//! [`Opcode::Custom`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device command selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// Clear the device console (0x01)
    ClearConsole,
    /// Print system information on the device console (0x02)
    ShowSystemInfo,
    /// Emit a mouse click from the device (0x03)
    MouseClick,
    /// Set the onboard LED, payload `[r, g, b]` (0x04)
    SetLedColor,
    /// Request a temperature sample, replies with a big-endian f32 (0x05)
    GetTemperature,
    /// Request a humidity sample, replies with a big-endian f32 (0x06)
    GetHumidity,
    /// Reboot the device (0xFF)
    ResetDevice,
    /// Any other byte, sent as-is
    Custom(u8),
}

impl Opcode {
    pub const CLEAR_CONSOLE: u8 = 0x01;
    pub const SHOW_SYSTEM_INFO: u8 = 0x02;
    pub const MOUSE_CLICK: u8 = 0x03;
    pub const SET_LED_COLOR: u8 = 0x04;
    pub const GET_TEMPERATURE: u8 = 0x05;
    pub const GET_HUMIDITY: u8 = 0x06;
    pub const RESET_DEVICE: u8 = 0xFF;

    /// Wire value of this opcode
    pub fn as_byte(self) -> u8 {
        match self {
            Opcode::ClearConsole => Self::CLEAR_CONSOLE,
            Opcode::ShowSystemInfo => Self::SHOW_SYSTEM_INFO,
            Opcode::MouseClick => Self::MOUSE_CLICK,
            Opcode::SetLedColor => Self::SET_LED_COLOR,
            Opcode::GetTemperature => Self::GET_TEMPERATURE,
            Opcode::GetHumidity => Self::GET_HUMIDITY,
            Opcode::ResetDevice => Self::RESET_DEVICE,
            Opcode::Custom(byte) => byte,
        }
    }

    /// Map a wire byte back to the named opcode when there is one
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::CLEAR_CONSOLE => Opcode::ClearConsole,
            Self::SHOW_SYSTEM_INFO => Opcode::ShowSystemInfo,
            Self::MOUSE_CLICK => Opcode::MouseClick,
            Self::SET_LED_COLOR => Opcode::SetLedColor,
            Self::GET_TEMPERATURE => Opcode::GetTemperature,
            Self::GET_HUMIDITY => Opcode::GetHumidity,
            Self::RESET_DEVICE => Opcode::ResetDevice,
            other => Opcode::Custom(other),
        }
    }
}

impl From<u8> for Opcode {
    fn from(byte: u8) -> Self {
        Opcode::from_byte(byte)
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        opcode.as_byte()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::ClearConsole => "CLEAR_CONSOLE",
            Opcode::ShowSystemInfo => "SHOW_SYSTEM_INFO",
            Opcode::MouseClick => "MOUSE_CLICK",
            Opcode::SetLedColor => "SET_LED_COLOR",
            Opcode::GetTemperature => "GET_TEMPERATURE",
            Opcode::GetHumidity => "GET_HUMIDITY",
            Opcode::ResetDevice => "RESET_DEVICE",
            Opcode::Custom(_) => "CUSTOM",
        };
        write!(f, "{} (0x{:02X})", name, self.as_byte())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_opcode_values() {
        assert_eq!(Opcode::ClearConsole.as_byte(), 0x01);
        assert_eq!(Opcode::ShowSystemInfo.as_byte(), 0x02);
        assert_eq!(Opcode::MouseClick.as_byte(), 0x03);
        assert_eq!(Opcode::SetLedColor.as_byte(), 0x04);
        assert_eq!(Opcode::GetTemperature.as_byte(), 0x05);
        assert_eq!(Opcode::GetHumidity.as_byte(), 0x06);
        assert_eq!(Opcode::ResetDevice.as_byte(), 0xFF);
    }

    #[test]
    fn test_from_byte_prefers_named_variant() {
        assert_eq!(Opcode::from_byte(0x04), Opcode::SetLedColor);
        assert_eq!(Opcode::from_byte(0xFF), Opcode::ResetDevice);
        assert_eq!(Opcode::from_byte(0x42), Opcode::Custom(0x42));
        assert_eq!(Opcode::Custom(0x42).as_byte(), 0x42);
    }

    #[test]
    fn test_display() {
        assert_eq!(Opcode::SetLedColor.to_string(), "SET_LED_COLOR (0x04)");
        assert_eq!(Opcode::Custom(0x10).to_string(), "CUSTOM (0x10)");
    }
}
