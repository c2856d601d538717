//! Firmware image model and file-format parsing.
//!
//! GRE firmware files share a minimal 4-byte header:
//!
//! ```text
//! +----------+--------------------+------------------+
//! | Platform |       Size         |     Payload      |
//! +----------+--------------------+------------------+
//! |  1 byte  | 3 bytes (BE u24)   |   `size` bytes   |
//! +----------+--------------------+------------------+
//! ```
//!
//! The platform byte tags which hardware variant the payload was built for;
//! the same physical scanner is sold under several platform codes, which is
//! why a transcoded sibling image can recover a bricked unit.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;

/// Length of the platform + size header preceding the payload.
pub const HEADER_LEN: usize = 4;

/// Maximum payload size expressible in the 24-bit size field.
pub const MAX_PAYLOAD: usize = 0x00FF_FFFF;

/// Known hardware platform codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Radio Shack PRO-668.
    Pro668,
    /// Whistler WS1080.
    Ws1080,
    /// Unrecognized platform code.
    Unknown(u8),
}

impl Platform {
    /// Classify a raw platform byte.
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            0xE4 => Self::Pro668,
            0xE6 => Self::Ws1080,
            other => Self::Unknown(other),
        }
    }

    /// Get the raw platform byte.
    pub fn code(&self) -> u8 {
        match self {
            Self::Pro668 => 0xE4,
            Self::Ws1080 => 0xE6,
            Self::Unknown(code) => *code,
        }
    }

    /// Get a human-readable name for the platform.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pro668 => "PRO-668",
            Self::Ws1080 => "WS1080",
            Self::Unknown(_) => "Unknown",
        }
    }

    /// Check if this is a known/expected platform code.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "Unknown(0x{code:02X})"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// A loaded firmware image: platform tag plus raw payload.
///
/// Immutable once constructed; transcoding produces a new image rather than
/// mutating in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    platform: u8,
    payload: Vec<u8>,
}

impl FirmwareImage {
    /// Construct an image from a platform code and payload.
    pub fn new(platform: u8, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::MalformedFirmware(format!(
                "payload of {} bytes exceeds the 24-bit size field",
                payload.len()
            )));
        }
        Ok(Self { platform, payload })
    }

    /// Parse an image from the on-disk firmware file layout.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::MalformedFirmware(format!(
                "file is {} bytes, shorter than the {HEADER_LEN}-byte header",
                data.len()
            )));
        }

        let mut header = &data[..HEADER_LEN];
        let platform = header.read_u8()?;
        let declared = header.read_u24::<BigEndian>()? as usize;
        let payload = &data[HEADER_LEN..];

        if declared != payload.len() {
            return Err(Error::MalformedFirmware(format!(
                "header declares {declared} payload bytes but file carries {}",
                payload.len()
            )));
        }

        Ok(Self {
            platform,
            payload: payload.to_vec(),
        })
    }

    /// Raw platform code byte.
    pub fn platform_code(&self) -> u8 {
        self.platform
    }

    /// Classified platform.
    pub fn platform(&self) -> Platform {
        Platform::from_code(self.platform)
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Raw firmware payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialize back to the on-disk firmware file layout.
    #[allow(clippy::cast_possible_truncation)] // payload length checked against MAX_PAYLOAD
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.write_u8(self.platform).unwrap();
        buf.write_u24::<BigEndian>(self.payload.len() as u32).unwrap();
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Consume the image and return its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file(platform: u8, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![platform];
        data.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn test_parse_valid_image() {
        let payload: Vec<u8> = (0..10).collect();
        let image = FirmwareImage::from_bytes(&sample_file(0xE6, &payload)).unwrap();

        assert_eq!(image.platform_code(), 0xE6);
        assert_eq!(image.platform(), Platform::Ws1080);
        assert_eq!(image.size(), 10);
        assert_eq!(image.payload(), payload.as_slice());
    }

    #[test]
    fn test_parse_size_mismatch() {
        let mut data = sample_file(0xE6, &[1, 2, 3]);
        data.push(0xFF); // one byte more than the header declares

        let err = FirmwareImage::from_bytes(&data).unwrap_err();
        assert!(matches!(err, Error::MalformedFirmware(_)));
    }

    #[test]
    fn test_parse_truncated_header() {
        let err = FirmwareImage::from_bytes(&[0xE6, 0x00]).unwrap_err();
        assert!(matches!(err, Error::MalformedFirmware(_)));
    }

    #[test]
    fn test_round_trip() {
        let original = sample_file(0xE4, &[0xAA, 0xBB, 0xCC]);
        let image = FirmwareImage::from_bytes(&original).unwrap();
        assert_eq!(image.to_bytes(), original);
    }

    #[test]
    fn test_platform_classification() {
        assert_eq!(Platform::from_code(0xE4), Platform::Pro668);
        assert_eq!(Platform::from_code(0xE6), Platform::Ws1080);
        assert_eq!(Platform::from_code(0x42), Platform::Unknown(0x42));

        assert!(Platform::Pro668.is_known());
        assert!(!Platform::Unknown(0x42).is_known());
        assert_eq!(Platform::Ws1080.to_string(), "WS1080");
        assert_eq!(Platform::Unknown(0x42).to_string(), "Unknown(0x42)");
    }

    #[test]
    fn test_big_endian_size_field() {
        // 0x012345 = 74565 bytes, big-endian in the header
        let payload = vec![0u8; 0x012345];
        let data = sample_file(0xE4, &payload);
        assert_eq!(&data[1..4], &[0x01, 0x23, 0x45]);

        let image = FirmwareImage::from_bytes(&data).unwrap();
        assert_eq!(image.size(), 0x012345);
    }
}
