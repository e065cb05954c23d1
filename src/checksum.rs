//! The 16-bit complement checksum used by JBD-style BMS frames.
//!
//! The checksum starts at zero and subtracts every byte, wrapping at 16 bits.
//! On the wire it is stored big-endian directly before the end marker.

/// Compute the checksum for the given bytes
pub fn compute(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |checksum, &b| checksum.wrapping_sub(b as u16))
}

/// Compute the checksum for the given bytes as it appears on the wire
pub fn to_wire(bytes: &[u8]) -> [u8; 2] {
    compute(bytes).to_be_bytes()
}

/// Check that `expected` (big-endian, as read from the wire) matches the bytes
pub fn verify(bytes: &[u8], expected: [u8; 2]) -> bool {
    compute(bytes) == u16::from_be_bytes(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(compute(&[]), 0);
    }

    #[test]
    fn read_hardware_info_command() {
        // DD A5 03 00 FF FD 77
        assert_eq!(compute(&[0x03, 0x00]), 0xfffd);
        assert_eq!(to_wire(&[0x03, 0x00]), [0xff, 0xfd]);
    }

    #[test]
    fn read_cell_info_command() {
        assert_eq!(to_wire(&[0x04, 0x00]), [0xff, 0xfc]);
    }

    #[test]
    fn wraps_past_zero_many_times() {
        let bytes = [0xff; 600];
        let expected = (0u32.wrapping_sub(0xff * 600) & 0xffff) as u16;
        assert_eq!(compute(&bytes), expected);
    }

    #[test]
    fn verify_rejects_flipped_byte() {
        let payload = hex::decode("00020fa0").unwrap();
        let wire = to_wire(&payload);
        assert!(verify(&payload, wire));
        assert!(!verify(&payload, [wire[0], wire[1] ^ 0x01]));
    }
}
