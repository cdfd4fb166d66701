//! Integration tests for report encoding and reply decoding
//!
//! Exercises the public codec surface the controller relies on: frame layout,
//! payload limits at several report sizes, and sensor value decoding.

use protocol::{
    DEFAULT_REPORT_SIZE, Opcode, ProtocolError, REPORT_ID, SensorKind, decode_f32_be, encode,
    encode_f32_be, max_payload,
};

mod frame_layout {
    use super::*;

    #[test]
    fn test_led_command_frame() {
        let frame = encode(Opcode::SetLedColor, &[255, 0, 0], DEFAULT_REPORT_SIZE)
            .expect("Failed to encode");

        let mut expected = vec![0x00, 0x04, 0xFF, 0x00, 0x00];
        expected.extend(std::iter::repeat_n(0x00, 59));
        assert_eq!(frame.as_bytes(), expected.as_slice());
    }

    #[test]
    fn test_every_named_opcode_encodes() {
        let opcodes = [
            Opcode::ClearConsole,
            Opcode::ShowSystemInfo,
            Opcode::MouseClick,
            Opcode::SetLedColor,
            Opcode::GetTemperature,
            Opcode::GetHumidity,
            Opcode::ResetDevice,
        ];

        for opcode in opcodes {
            let frame = encode(opcode, &[], DEFAULT_REPORT_SIZE).expect("Failed to encode");
            assert_eq!(frame.len(), DEFAULT_REPORT_SIZE);
            assert_eq!(frame.as_bytes()[0], REPORT_ID);
            assert_eq!(frame.as_bytes()[1], opcode.as_byte());
            assert_eq!(frame.opcode(), opcode);
        }
    }

    #[test]
    fn test_payload_then_zero_padding() {
        for report_size in [3usize, 8, 32, 64, 65] {
            for len in 0..=max_payload(report_size) {
                let payload: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_add(1)).collect();
                let frame =
                    encode(Opcode::Custom(0x7E), &payload, report_size).expect("Failed to encode");

                let bytes = frame.as_bytes();
                assert_eq!(bytes.len(), report_size);
                assert_eq!(bytes[0], 0x00);
                assert_eq!(bytes[1], 0x7E);
                assert_eq!(&bytes[2..2 + len], payload.as_slice());
                assert!(bytes[2 + len..].iter().all(|&b| b == 0));
            }
        }
    }

    #[test]
    fn test_custom_opcode_zero() {
        let frame = encode(Opcode::Custom(0x00), &[1, 2], 16).expect("Failed to encode");
        assert_eq!(&frame.as_bytes()[..4], &[0x00, 0x00, 0x01, 0x02]);
    }
}

mod payload_limits {
    use super::*;

    #[test]
    fn test_oversized_payload_rejected_at_each_size() {
        for report_size in [3usize, 16, 64] {
            let max = max_payload(report_size);
            let payload = vec![0xFF; max + 1];
            let err = encode(Opcode::Custom(0x01), &payload, report_size).unwrap_err();
            assert_eq!(
                err,
                ProtocolError::PayloadTooLarge {
                    len: max + 1,
                    max
                }
            );
        }
    }

    #[test]
    fn test_max_payload() {
        assert_eq!(max_payload(64), 62);
        assert_eq!(max_payload(3), 1);
        assert_eq!(max_payload(0), 0);
    }
}

mod float_decoding {
    use super::*;

    #[test]
    fn test_temperature_reply() {
        let reply = [0x41, 0xF0, 0x00, 0x00];
        assert_eq!(decode_f32_be(&reply).expect("Failed to decode"), 30.0);
    }

    #[test]
    fn test_full_report_reply() {
        let mut reply = vec![0u8; 64];
        reply[..4].copy_from_slice(&encode_f32_be(41.5));
        assert_eq!(decode_f32_be(&reply).expect("Failed to decode"), 41.5);
    }

    #[test]
    fn test_short_replies() {
        for len in 0..4 {
            let reply = vec![0x41; len];
            assert_eq!(
                decode_f32_be(&reply),
                Err(ProtocolError::ShortRead {
                    needed: 4,
                    actual: len
                })
            );
        }
    }

    #[test]
    fn test_special_values_keep_bit_pattern() {
        let values = [
            0.0f32,
            -0.0,
            -12.75,
            f32::MIN_POSITIVE,
            f32::INFINITY,
            f32::NEG_INFINITY,
            f32::NAN,
            f32::from_bits(0x7FC0_0001),
        ];
        for value in values {
            let decoded = decode_f32_be(&encode_f32_be(value)).expect("Failed to decode");
            assert_eq!(decoded.to_bits(), value.to_bits());
        }
    }

    #[test]
    fn test_sensor_kinds_map_to_request_opcodes() {
        assert_eq!(SensorKind::Temperature.opcode().as_byte(), 0x05);
        assert_eq!(SensorKind::Humidity.opcode().as_byte(), 0x06);
    }
}
