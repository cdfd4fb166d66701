//! Protocol error types

use thiserror::Error;

/// Codec-level errors
///
/// These are caller contract violations or malformed device replies. The codec
/// never truncates or pads its way around them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Payload does not fit into one report after the report id and opcode bytes
    #[error("Payload too large: {len} bytes (max: {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// Response buffer is shorter than the value being decoded
    #[error("Short read: needed {needed} bytes, got {actual}")]
    ShortRead { needed: usize, actual: usize },

    /// Report size cannot hold the two header bytes
    #[error("Invalid report size: {size} (min: {min})")]
    InvalidReportSize { size: usize, min: usize },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::PayloadTooLarge { len: 63, max: 62 };
        let msg = format!("{}", err);
        assert!(msg.contains("Payload too large"));
        assert!(msg.contains("63"));
        assert!(msg.contains("62"));
    }

    #[test]
    fn test_short_read_error() {
        let err = ProtocolError::ShortRead {
            needed: 4,
            actual: 2,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Short read"));
        assert!(msg.contains("needed 4"));
    }
}
