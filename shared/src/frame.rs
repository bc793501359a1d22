/*!
Response frame decoding.

The encoder answers every command with a fixed-length response. Only the
length is checked by default; the leading signature can optionally be
verified as well. The angle field is a big-endian 16-bit count at a fixed
offset, everything else in the payload is left opaque.
*/

use crate::protocol::{ANGLE_OFFSET, RESPONSE_LEN, RESPONSE_SIGNATURE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Instantaneous encoder position as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RawCount(pub u16);

impl RawCount {
    /// Get the raw count value
    pub fn value(self) -> u16 {
        self.0
    }

    /// Apply wrap correction against the given full-scale count
    pub fn corrected(self, max_counts: u32) -> i64 {
        crate::angle::correct_wrap(self.0, max_counts)
    }
}

/// Reasons a received buffer is not accepted as a frame.
///
/// These are expected outcomes on a slow serial link, not errors: the
/// sampling loop discards the buffer and issues the command again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameRejection {
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("Unexpected frame signature: {}", hex::encode(.found))]
    Signature { found: [u8; 6] },
}

/// Validates response buffers and extracts the raw angle count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameDecoder {
    strict_header: bool,
}

impl FrameDecoder {
    /// Create a decoder that accepts any buffer of the right length
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder with optional signature checking
    pub fn with_strict_header(strict_header: bool) -> Self {
        Self { strict_header }
    }

    /// Whether the response signature is verified
    pub fn is_strict(&self) -> bool {
        self.strict_header
    }

    /// Decode a response buffer into a raw count.
    ///
    /// Pure function of the input: the same buffer always yields the same result.
    pub fn decode(&self, buffer: &[u8]) -> Result<RawCount, FrameRejection> {
        if buffer.len() != RESPONSE_LEN {
            return Err(FrameRejection::Length {
                expected: RESPONSE_LEN,
                actual: buffer.len(),
            });
        }

        if self.strict_header && buffer[..RESPONSE_SIGNATURE.len()] != RESPONSE_SIGNATURE {
            let mut found = [0u8; 6];
            found.copy_from_slice(&buffer[..RESPONSE_SIGNATURE.len()]);
            return Err(FrameRejection::Signature { found });
        }

        let count = u16::from_be_bytes([buffer[ANGLE_OFFSET], buffer[ANGLE_OFFSET + 1]]);
        Ok(RawCount(count))
    }
}

/// Build a well-formed response carrying the given angle count.
///
/// Payload bytes other than the signature and angle field are zero.
pub fn synthetic_response(count: u16) -> Vec<u8> {
    let mut frame = vec![0u8; RESPONSE_LEN];
    frame[..RESPONSE_SIGNATURE.len()].copy_from_slice(&RESPONSE_SIGNATURE);
    frame[ANGLE_OFFSET..ANGLE_OFFSET + 2].copy_from_slice(&count.to_be_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_angle_field() {
        let mut buffer = vec![0u8; RESPONSE_LEN];
        buffer[29] = 0x40;
        buffer[30] = 0x00;

        let decoder = FrameDecoder::new();
        assert_eq!(decoder.decode(&buffer), Ok(RawCount(16384)));
    }

    #[test]
    fn test_decode_is_pure() {
        let buffer = synthetic_response(12345);
        let decoder = FrameDecoder::new();

        let first = decoder.decode(&buffer).unwrap();
        let second = decoder.decode(&buffer).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.value(), 12345);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let decoder = FrameDecoder::new();

        assert_eq!(
            decoder.decode(&[0u8; 68]),
            Err(FrameRejection::Length { expected: 69, actual: 68 })
        );
        assert_eq!(
            decoder.decode(&[0u8; 70]),
            Err(FrameRejection::Length { expected: 69, actual: 70 })
        );
        assert!(decoder.decode(&[]).is_err());
    }

    #[test]
    fn test_signature_ignored_by_default() {
        let mut buffer = synthetic_response(100);
        buffer[0] = 0xFF;

        assert_eq!(FrameDecoder::new().decode(&buffer), Ok(RawCount(100)));
    }

    #[test]
    fn test_strict_header() {
        let decoder = FrameDecoder::with_strict_header(true);
        assert!(decoder.is_strict());

        let good = synthetic_response(100);
        assert_eq!(decoder.decode(&good), Ok(RawCount(100)));

        let mut bad = good.clone();
        bad[2] = 0x41;
        let rejection = decoder.decode(&bad).unwrap_err();
        assert_eq!(
            rejection,
            FrameRejection::Signature { found: [0x50, 0x03, 0x41, 0x00, 0x02, 0x00] }
        );
        assert_eq!(rejection.to_string(), "Unexpected frame signature: 500341000200");
    }

    #[test]
    fn test_raw_count_correction() {
        assert_eq!(RawCount(16384).corrected(32768), 16384);
        assert_eq!(RawCount(24576).corrected(32768), 24576);
        assert_eq!(RawCount(24577).corrected(32768), -8191);
        assert_eq!(RawCount(32767).corrected(32768), -1);
    }

    #[test]
    fn test_synthetic_response_layout() {
        let frame = synthetic_response(0x7FFF);
        assert_eq!(frame.len(), RESPONSE_LEN);
        assert_eq!(&frame[..6], &RESPONSE_SIGNATURE);
        assert_eq!(frame[29], 0x7F);
        assert_eq!(frame[30], 0xFF);
    }
}
