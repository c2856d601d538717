//! Error types for greflash.

use std::io;
use thiserror::Error;

/// Result type for greflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for greflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No usable serial port was found.
    #[error("No scanner serial port found")]
    PortNotFound,

    /// Invalid firmware file layout.
    #[error("Malformed firmware file: {0}")]
    MalformedFirmware(String),

    /// Transcoding requested with a table that does not match the image's
    /// declared source platform.
    #[error("Platform mismatch: table expects 0x{expected:02X}, image is tagged 0x{actual:02X}")]
    PlatformMismatch {
        /// Source platform the table was built for.
        expected: u8,
        /// Platform code the image actually carries.
        actual: u8,
    },

    /// Data chunk exceeds the protocol's packet payload limit.
    #[error("Packet payload too large: {len} bytes (max {max})")]
    PacketTooLarge {
        /// Offered payload length.
        len: usize,
        /// Maximum payload length the protocol allows.
        max: usize,
    },

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A received control sequence does not match any recognized signal.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Bootloader cancelled the transfer (CAN received).
    #[error("Transfer rejected by bootloader (CAN)")]
    Rejected,

    /// Bounded retry budget for a header or data packet exhausted.
    #[error("Retry limit exceeded after {attempts} attempts")]
    RetryLimitExceeded {
        /// Number of transmission attempts made.
        attempts: u32,
    },

    /// Caller-initiated abort observed between packets.
    #[error("Upload cancelled")]
    Cancelled,
}
