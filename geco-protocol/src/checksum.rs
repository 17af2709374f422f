//! Frame checksums.
//!
//! The header is protected by CRC-8/DVB-S2 and the payload by a CRC-16 with
//! polynomial 0x1021, zero init and no reflection (CRC-16/XMODEM). Both match
//! the register maps published for existing Hewalex integrations.

use crc::{Crc, CRC_16_XMODEM, CRC_8_DVB_S2};

const HEADER: Crc<u8> = Crc::<u8>::new(&CRC_8_DVB_S2);
const PAYLOAD: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Checksum over the first seven header bytes.
pub fn header_crc(bytes: &[u8]) -> u8 {
    HEADER.checksum(bytes)
}

/// Checksum over the payload, excluding its trailing two CRC bytes.
pub fn payload_crc(bytes: &[u8]) -> u16 {
    PAYLOAD.checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_check_values() {
        assert_eq!(header_crc(b"123456789"), 0xBC);
        assert_eq!(payload_crc(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(header_crc(&[]), 0);
        assert_eq!(payload_crc(&[]), 0);
    }

    #[test]
    fn test_known_status_request() {
        // Header and payload of a status read (controller 1/1 -> device 2/2).
        let header = [0x69, 0x02, 0x01, 0x84, 0x00, 0x00, 0x0C];
        assert_eq!(header_crc(&header), 0xF6);

        let payload = [0x02, 0x00, 0x01, 0x00, 0x40, 0x80, 0x00, 0x32, 0x64, 0x00];
        assert_eq!(payload_crc(&payload), 0xBDB2);
    }
}
