//! Protocol library for hid-controller
//!
//! This crate defines the fixed-size report protocol spoken with the device:
//! the opcode table, frame encoding, reply decoding, and the shared types and
//! typed errors the controller hands to its callers.
//!
//! # Example
//!
//! ```
//! use protocol::{Opcode, decode_f32_be, encode};
//!
//! // Build a 64-byte LED command
//! let frame = encode(Opcode::SetLedColor, &[0, 255, 0], 64).unwrap();
//! assert_eq!(frame.as_bytes()[1], 0x04);
//!
//! // Decode a temperature reply
//! let celsius = decode_f32_be(&[0x41, 0xF0, 0x00, 0x00]).unwrap();
//! assert_eq!(celsius, 30.0);
//! ```

pub mod codec;
pub mod error;
pub mod opcode;
pub mod types;

pub use codec::{
    DEFAULT_REPORT_SIZE, FLOAT_LEN, Frame, HEADER_LEN, MIN_REPORT_SIZE, REPORT_ID, decode_f32_be,
    encode, encode_f32_be, max_payload,
};
pub use error::{ProtocolError, Result};
pub use opcode::Opcode;
pub use types::{
    ConnectError, ConnectionState, DeviceDescriptor, DeviceIdentity, InvalidIdentity, LedColor,
    SensorKind, SensorObservation, SensorReading, TransportError, UNKNOWN,
};
