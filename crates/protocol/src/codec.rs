//! Report framing and value decoding
//!
//! Every command is a single fixed-size HID output report. There is no length
//! prefix and no checksum; the report size is agreed out of band (64 bytes for
//! full-speed HID).
//!
//! # Frame Format
//!
//! ```text
//! [Report ID: 0x00][Opcode: u8][Payload: 0..=report_size-2 bytes][Zero padding]
//! ```
//!
//! Sensor replies carry a big-endian IEEE-754 `f32` in their first four bytes.

use crate::Opcode;
use crate::error::{ProtocolError, Result};
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

/// Default HID report size in bytes
pub const DEFAULT_REPORT_SIZE: usize = 64;

/// Report id placed in byte 0 of every frame
pub const REPORT_ID: u8 = 0x00;

/// Bytes taken by the report id and opcode
pub const HEADER_LEN: usize = 2;

/// Smallest report size that can carry a header and one payload byte
pub const MIN_REPORT_SIZE: usize = HEADER_LEN + 1;

/// Width of an encoded sensor value
pub const FLOAT_LEN: usize = 4;

/// One encoded command report
///
/// Always exactly `report_size` bytes long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    /// Raw report bytes, report id included
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Report length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Frames are never empty; kept for API symmetry with slices
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Opcode carried in byte 1
    pub fn opcode(&self) -> Opcode {
        Opcode::from_byte(self.bytes[1])
    }

    /// Everything after the header, padding included
    pub fn body(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }

    /// Consume the frame into its backing buffer
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Largest payload that fits into a report of `report_size` bytes
pub fn max_payload(report_size: usize) -> usize {
    report_size.saturating_sub(HEADER_LEN)
}

/// Encode a command into a zero-padded report
///
/// Fails with [`ProtocolError::PayloadTooLarge`] instead of truncating when the
/// payload exceeds `report_size - 2` bytes.
///
/// # Example
/// ```
/// use protocol::{Opcode, encode};
///
/// let frame = encode(Opcode::SetLedColor, &[255, 0, 0], 64).unwrap();
/// assert_eq!(frame.len(), 64);
/// assert_eq!(&frame.as_bytes()[..5], &[0x00, 0x04, 0xFF, 0x00, 0x00]);
/// ```
pub fn encode(opcode: Opcode, payload: &[u8], report_size: usize) -> Result<Frame> {
    if report_size < MIN_REPORT_SIZE {
        return Err(ProtocolError::InvalidReportSize {
            size: report_size,
            min: MIN_REPORT_SIZE,
        });
    }

    let max = max_payload(report_size);
    if payload.len() > max {
        return Err(ProtocolError::PayloadTooLarge {
            len: payload.len(),
            max,
        });
    }

    let mut buf = BytesMut::with_capacity(report_size);
    buf.put_u8(REPORT_ID);
    buf.put_u8(opcode.as_byte());
    buf.put_slice(payload);
    buf.resize(report_size, 0);

    Ok(Frame {
        bytes: buf.freeze(),
    })
}

/// Decode a big-endian IEEE-754 `f32` from the first four bytes
///
/// # Example
/// ```
/// use protocol::decode_f32_be;
///
/// let value = decode_f32_be(&[0x41, 0xF0, 0x00, 0x00]).unwrap();
/// assert_eq!(value, 30.0);
/// ```
pub fn decode_f32_be(buffer: &[u8]) -> Result<f32> {
    if buffer.len() < FLOAT_LEN {
        return Err(ProtocolError::ShortRead {
            needed: FLOAT_LEN,
            actual: buffer.len(),
        });
    }
    Ok(BigEndian::read_f32(&buffer[..FLOAT_LEN]))
}

/// Encode an `f32` the way the firmware replies with it
pub fn encode_f32_be(value: f32) -> [u8; FLOAT_LEN] {
    let mut out = [0u8; FLOAT_LEN];
    BigEndian::write_f32(&mut out, value);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_pads_to_report_size() {
        let frame = encode(Opcode::ClearConsole, &[], 64).unwrap();
        assert_eq!(frame.len(), 64);
        assert_eq!(frame.as_bytes()[0], REPORT_ID);
        assert_eq!(frame.as_bytes()[1], 0x01);
        assert!(frame.body().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_full_payload() {
        let payload = vec![0xAB; 62];
        let frame = encode(Opcode::Custom(0x10), &payload, 64).unwrap();
        assert_eq!(frame.body(), payload.as_slice());
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = vec![0u8; 63];
        let err = encode(Opcode::Custom(0x10), &payload, 64).unwrap_err();
        assert_eq!(err, ProtocolError::PayloadTooLarge { len: 63, max: 62 });
    }

    #[test]
    fn test_encode_rejects_tiny_report() {
        let err = encode(Opcode::ClearConsole, &[], 2).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidReportSize { size: 2, .. }));
    }

    #[test]
    fn test_frame_accessors() {
        let frame = encode(Opcode::GetHumidity, &[], 8).unwrap();
        assert_eq!(frame.opcode(), Opcode::GetHumidity);
        assert_eq!(frame.body().len(), 6);
        assert_eq!(frame.into_bytes().len(), 8);
    }

    #[test]
    fn test_decode_float() {
        assert_eq!(decode_f32_be(&[0x41, 0xF0, 0x00, 0x00]).unwrap(), 30.0);
        // Trailing padding is ignored
        assert_eq!(decode_f32_be(&[0x3F, 0x80, 0x00, 0x00, 0xEE, 0xEE]).unwrap(), 1.0);
    }

    #[test]
    fn test_decode_short_buffer() {
        assert_eq!(
            decode_f32_be(&[0x41, 0xF0, 0x00]),
            Err(ProtocolError::ShortRead {
                needed: 4,
                actual: 3
            })
        );
        assert!(decode_f32_be(&[]).is_err());
    }

    #[test]
    fn test_float_bit_patterns_survive() {
        for value in [0.0f32, -0.0, -40.25, 1.0e-38, f32::MAX, f32::NAN] {
            let decoded = decode_f32_be(&encode_f32_be(value)).unwrap();
            assert_eq!(decoded.to_bits(), value.to_bits());
        }
    }
}
