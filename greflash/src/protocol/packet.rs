//! Packet framing and checksums for the GRE bootloader protocol.
//!
//! Every packet shares the same frame:
//!
//! ```text
//! +-----+----------------+-----+----------+
//! | STX |    payload     | ETX | checksum |
//! +-----+----------------+-----+----------+
//! | 1   |    variable    | 1   | 1        |
//! +-----+----------------+-----+----------+
//! ```
//!
//! The checksum is the byte sum of the covered payload plus ETX, modulo 256.
//! Firmware data rides as hex-ASCII (two uppercase characters per raw byte)
//! with the checksum computed over the raw bytes; command packets (version
//! query, firmware header) carry their payload verbatim.

use crate::error::{Error, Result};

/// Protocol control characters.
pub mod control {
    /// Start of packet.
    pub const STX: u8 = 0x02;
    /// End of packet, also the checksum seed.
    pub const ETX: u8 = 0x03;
    /// End of transmission (update complete).
    pub const EOT: u8 = 0x04;
    /// Enquiry (ready for next packet).
    pub const ENQ: u8 = 0x05;
    /// Acknowledgement.
    pub const ACK: u8 = 0x06;
    /// Data link escape (update start).
    pub const DLE: u8 = 0x10;
    /// Negative acknowledgement.
    pub const NAK: u8 = 0x15;
    /// Cancel (update error).
    pub const CAN: u8 = 0x18;
    /// Bootloader ready probe, repeated while waiting for a sender.
    pub const READY: u8 = b'C';
}

/// Maximum raw payload bytes per data packet.
pub const MAX_CHUNK: usize = 50;

/// Number of hex-ASCII characters in the header's size field.
const SIZE_HEX_CHARS: usize = 6;

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Compute the packet checksum: `(sum(payload) + ETX) mod 256`.
pub fn checksum(payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(control::ETX, |acc, b| acc.wrapping_add(*b))
}

/// Frame a command payload verbatim: `STX ‖ payload ‖ ETX ‖ checksum`.
///
/// Used for the version query and the firmware header, whose payloads are
/// transmitted as-is.
pub fn encode_command_packet(payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(payload.len() + 3);
    packet.push(control::STX);
    packet.extend_from_slice(payload);
    packet.push(control::ETX);
    packet.push(checksum(payload));
    packet
}

/// Frame a firmware data chunk: `STX ‖ hex(chunk) ‖ ETX ‖ checksum(chunk)`.
///
/// The chunk is expanded to uppercase hex-ASCII on the wire, but the
/// checksum covers the raw bytes.
pub fn encode_data_packet(chunk: &[u8]) -> Result<Vec<u8>> {
    if chunk.len() > MAX_CHUNK {
        return Err(Error::PacketTooLarge {
            len: chunk.len(),
            max: MAX_CHUNK,
        });
    }

    let mut packet = Vec::with_capacity(chunk.len() * 2 + 3);
    packet.push(control::STX);
    for b in chunk {
        packet.push(HEX_UPPER[usize::from(b >> 4)]);
        packet.push(HEX_UPPER[usize::from(b & 0x0F)]);
    }
    packet.push(control::ETX);
    packet.push(checksum(chunk));
    Ok(packet)
}

/// Build the firmware header packet.
///
/// Payload is the target platform code followed by the payload size as six
/// uppercase hex-ASCII characters.
pub fn encode_header_packet(platform: u8, size: usize) -> Result<Vec<u8>> {
    if size > crate::image::MAX_PAYLOAD {
        return Err(Error::MalformedFirmware(format!(
            "size {size} does not fit the header's {SIZE_HEX_CHARS}-digit field"
        )));
    }

    let mut payload = Vec::with_capacity(1 + SIZE_HEX_CHARS);
    payload.push(platform);
    payload.extend_from_slice(format!("{size:06X}").as_bytes());
    Ok(encode_command_packet(&payload))
}

/// Unframe a data packet and verify its checksum, returning the raw chunk.
pub fn decode_data_packet(packet: &[u8]) -> Result<Vec<u8>> {
    if packet.len() < 3 || packet[0] != control::STX {
        return Err(Error::UnexpectedResponse(
            "data packet is not STX-framed".into(),
        ));
    }
    let (body, trailer) = packet[1..].split_at(packet.len() - 3);
    if trailer[0] != control::ETX {
        return Err(Error::UnexpectedResponse(
            "data packet is missing the ETX sentinel".into(),
        ));
    }
    if body.len() % 2 != 0 {
        return Err(Error::UnexpectedResponse(
            "data packet carries an odd number of hex characters".into(),
        ));
    }

    let chunk = body
        .chunks_exact(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| {
                    Error::UnexpectedResponse("data packet carries non-hex characters".into())
                })
        })
        .collect::<Result<Vec<u8>>>()?;

    let expected = checksum(&chunk);
    if trailer[1] != expected {
        return Err(Error::UnexpectedResponse(format!(
            "checksum mismatch: expected 0x{expected:02X}, got 0x{:02X}",
            trailer[1]
        )));
    }
    Ok(chunk)
}

/// Check a data packet's framing and checksum without keeping the chunk.
#[must_use]
pub fn verify_checksum(packet: &[u8]) -> bool {
    decode_data_packet(packet).is_ok()
}
