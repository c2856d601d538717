//! # greflash
//!
//! A library for recovering bricked GRE/Whistler-platform radio scanners.
//!
//! A PRO-668 whose firmware was erased by loading an incompatible image is
//! left with only its serial bootloader alive. This crate provides
//! everything needed to talk it back to life:
//!
//! - Firmware image parsing (platform byte + 24-bit size header)
//! - WS1080 -> PRO-668 XOR transcoding
//! - GRE bootloader packet framing and checksums
//! - The upload state machine with bounded timeouts and retries
//! - A serial `Port` abstraction with a native `serialport` backend
//!
//! ## Supported Platforms
//!
//! - PRO-668 (0xE4), recovered with transcoded WS1080 (0xE6) firmware
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport`
//!   crate
//! - `serde`: Serialization support for upload reports
//!
//! ## Example
//!
//! ```rust,no_run
//! use greflash::{FirmwareImage, ScannerFlasher};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let data = std::fs::read("WS1080e_U3.8.bin")?;
//!     let image = FirmwareImage::from_bytes(&data)?;
//!
//!     let mut flasher = ScannerFlasher::open("/dev/ttyUSB0", 115_200)?;
//!     let report = flasher.upload(&image, true, |bytes, packets| {
//!         println!("sent {bytes} bytes in {packets} packet(s)");
//!     })?;
//!     flasher.close();
//!
//!     println!("done: {} bytes uploaded", report.bytes_sent);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod detect;
pub mod error;
pub mod flasher;
pub mod image;
pub mod port;
pub mod protocol;
pub mod transcode;

static CANCEL_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global cancellation checker consulted between packets.
///
/// The checker should return `true` when the current upload should stop
/// (for example after receiving Ctrl-C in CLI applications). The uploader
/// then aborts cleanly with a CAN instead of leaving the link mid-transfer.
pub fn set_cancel_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = CANCEL_CHECKER.set(Arc::new(checker));
}

/// Returns whether cancellation was requested by the embedding application.
#[must_use]
pub fn is_cancel_requested() -> bool {
    CANCEL_CHECKER.get().is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_cancelled(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_CANCEL_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_CANCEL_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_cancel_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    detect::{DetectedPort, DeviceKind, format_port_list},
    error::{Error, Result},
    flasher::ScannerFlasher,
    image::{FirmwareImage, Platform},
    port::{DEFAULT_BAUD, Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::packet::{MAX_CHUNK, control},
    protocol::uploader::{
        AckCadence, FirmwareUploader, UploadConfig, UploadError, UploadPhase, UploadReport,
    },
    transcode::{TranscodeTable, WS1080_TO_PRO668},
};

#[cfg(feature = "native")]
pub use detect::{auto_detect_port, detect_ports, detect_scanner_ports};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_checker_default_false() {
        test_set_cancelled(false);
        assert!(!is_cancel_requested());
    }

    #[test]
    fn test_cancel_checker_toggle_true_false() {
        test_set_cancelled(true);
        assert!(is_cancel_requested());

        test_set_cancelled(false);
        assert!(!is_cancel_requested());
    }
}
