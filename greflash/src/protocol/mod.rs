//! GRE bootloader upload protocol.

pub mod packet;
pub mod uploader;

// Re-export common types
pub use packet::{MAX_CHUNK, checksum, control, encode_data_packet, encode_header_packet};
pub use uploader::{
    AckCadence, FirmwareUploader, UploadConfig, UploadError, UploadPhase, UploadReport,
};
