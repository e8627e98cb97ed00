//! Little-endian integer encoding used everywhere integers cross the disk
//! boundary.

use zerocopy::FromBytes;
use zerocopy::little_endian::{U32, U64};

/// Decodes a little-endian `u32` from exactly four bytes.
pub fn read_u32(bytes: &[u8]) -> Result<u32> {
    U32::read_from_bytes(bytes)
        .map(|v| v.get())
        .map_err(|_| Error::Length {
            expected: size_of::<u32>(),
            actual: bytes.len(),
        })
}

/// Decodes a little-endian `u64` from exactly eight bytes.
pub fn read_u64(bytes: &[u8]) -> Result<u64> {
    U64::read_from_bytes(bytes)
        .map(|v| v.get())
        .map_err(|_| Error::Length {
            expected: size_of::<u64>(),
            actual: bytes.len(),
        })
}

/// Encodes a `u32` as four little-endian bytes.
pub fn write_u32(value: u32) -> [u8; 4] {
    U32::new(value).to_bytes()
}

/// Encodes a `u64` as eight little-endian bytes.
pub fn write_u64(value: u64) -> [u8; 8] {
    U64::new(value).to_bytes()
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn u32_is_little_endian() {
        assert_eq!(write_u32(0x1234_5678), [0x78, 0x56, 0x34, 0x12]);
        assert_eq!(read_u32(&[0x78, 0x56, 0x34, 0x12]).unwrap(), 0x1234_5678);
    }

    #[test]
    fn u64_is_little_endian() {
        assert_eq!(
            write_u64(0x0102_0304_0506_0708),
            [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn wrong_width_is_rejected() {
        assert!(read_u32(&[0u8; 3]).is_err());
        assert!(read_u32(&[0u8; 5]).is_err());
        assert!(read_u64(&[0u8; 4]).is_err());
    }

    proptest! {
        #[test]
        fn u32_round_trips(value in any::<u32>()) {
            prop_assert_eq!(read_u32(&write_u32(value)).unwrap(), value);
        }

        #[test]
        fn u64_round_trips(value in any::<u64>()) {
            prop_assert_eq!(read_u64(&write_u64(value)).unwrap(), value);
        }
    }
}
