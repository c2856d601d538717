//! High-level recovery orchestration over a serial port.
//!
//! [`ScannerFlasher`] owns the port for the duration of one upload attempt:
//! it applies the transcoding policy, conditions the port (timeout, stale
//! buffers), runs the [`FirmwareUploader`] state machine, and releases the
//! port on every exit path via [`close`](ScannerFlasher::close) or drop.

use crate::error::Error;
use crate::image::{FirmwareImage, Platform};
use crate::port::Port;
use crate::protocol::uploader::{FirmwareUploader, UploadConfig, UploadError, UploadPhase, UploadReport};
use crate::transcode::WS1080_TO_PRO668;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Blocking grain for individual port reads; the uploader's own deadlines
/// bound the real waits.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Drives one recovery upload over an owned serial port.
pub struct ScannerFlasher<P: Port> {
    port: P,
    config: UploadConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl<P: Port> ScannerFlasher<P> {
    /// Create a flasher with an already-open port and default protocol
    /// configuration.
    pub fn new(port: P) -> Self {
        Self::with_config(port, UploadConfig::default())
    }

    /// Create a flasher with custom protocol configuration.
    pub fn with_config(port: P, config: UploadConfig) -> Self {
        Self {
            port,
            config,
            cancel: None,
        }
    }

    /// Use an explicit cancellation flag instead of the library-global
    /// checker.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the flasher and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Close the underlying port.
    ///
    /// Safe to call on any exit path, including after a failed upload.
    pub fn close(&mut self) {
        let _ = self.port.close();
    }

    /// Upload a firmware image to the bootloader.
    ///
    /// With `transcode` set, WS1080-tagged images are transcoded to PRO-668
    /// before upload and PRO-668 images pass through unchanged; with it
    /// clear the image is sent exactly as loaded (diagnostic path).
    /// Progress is reported as `(bytes_sent, packet_index)`.
    pub fn upload<F>(
        &mut self,
        image: &FirmwareImage,
        transcode: bool,
        progress: F,
    ) -> Result<UploadReport, UploadError>
    where
        F: FnMut(usize, usize),
    {
        let prepared = if transcode {
            self.prepare_image(image).map_err(setup_error)?
        } else {
            debug!("Transcoding bypassed, sending image as-is");
            image.clone()
        };

        self.port
            .set_timeout(POLL_INTERVAL)
            .and_then(|()| self.port.clear_buffers())
            .map_err(setup_error)?;

        info!(
            "Uploading {} bytes for platform 0x{:02X} on {}",
            prepared.size(),
            prepared.platform_code(),
            self.port.name()
        );

        let mut uploader = FirmwareUploader::with_config(&mut self.port, self.config.clone());
        if let Some(flag) = &self.cancel {
            uploader = uploader.with_cancel_flag(Arc::clone(flag));
        }
        uploader.upload(&prepared, progress)
    }

    /// Apply the transcoding policy for a recovery upload.
    fn prepare_image(&self, image: &FirmwareImage) -> Result<FirmwareImage, Error> {
        match image.platform() {
            Platform::Ws1080 => {
                info!("Transcoding WS1080 -> PRO-668...");
                WS1080_TO_PRO668.apply(image)
            },
            Platform::Pro668 => {
                debug!("Image is already PRO-668 format");
                Ok(image.clone())
            },
            Platform::Unknown(code) => {
                warn!("Unknown platform 0x{code:02X}, sending image as-is");
                Ok(image.clone())
            },
        }
    }
}

/// Wrap a pre-protocol failure in the upload error surface.
fn setup_error(source: Error) -> UploadError {
    UploadError {
        phase: UploadPhase::Preparing,
        packets_sent: 0,
        source,
    }
}

// Native-specific convenience functions
#[cfg(feature = "native")]
mod native_impl {
    use super::{Duration, ScannerFlasher};
    use crate::error::{Error, Result};
    use crate::port::{NativePort, SerialConfig};
    use log::{debug, warn};
    use std::thread;

    const MAX_OPEN_ATTEMPTS: usize = 3;
    const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

    impl ScannerFlasher<NativePort> {
        /// Open a serial port by name and create a flasher for it.
        pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
            Self::open_with_config(&SerialConfig::new(port_name, baud_rate))
        }

        /// Open a serial port with full configuration, retrying briefly in
        /// case the OS has not released the device yet.
        pub fn open_with_config(config: &SerialConfig) -> Result<Self> {
            let mut last_error = None;

            for attempt in 1..=MAX_OPEN_ATTEMPTS {
                match NativePort::open(config) {
                    Ok(port) => {
                        if attempt > 1 {
                            debug!("Port opened on attempt {attempt}");
                        }
                        return Ok(Self::new(port));
                    },
                    Err(e) => {
                        warn!(
                            "Failed to open port {} (attempt {attempt}/{MAX_OPEN_ATTEMPTS}): {e}",
                            config.port_name
                        );
                        last_error = Some(e);

                        if attempt < MAX_OPEN_ATTEMPTS {
                            thread::sleep(OPEN_RETRY_DELAY);
                        }
                    },
                }
            }

            Err(last_error.unwrap_or(Error::PortNotFound))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::protocol::packet::{self, control};
    use std::collections::VecDeque;
    use std::io::{Read, Write};

    /// In-memory `Port` for exercising the flasher without hardware.
    struct MockPort {
        read_buf: VecDeque<u8>,
        write_buf: Vec<u8>,
        timeout: Duration,
        closed: bool,
    }

    impl MockPort {
        fn new(response: &[u8]) -> Self {
            Self {
                read_buf: response.iter().copied().collect(),
                write_buf: Vec::new(),
                timeout: Duration::from_millis(100),
                closed: false,
            }
        }

        fn count_written(&self, needle: &[u8]) -> usize {
            self.write_buf
                .windows(needle.len())
                .filter(|w| *w == needle)
                .count()
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.read_buf.pop_front() {
                Some(b) if !buf.is_empty() => {
                    buf[0] = b;
                    Ok(1)
                },
                _ => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data")),
            }
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.write_buf.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for MockPort {
        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeout = timeout;
            Ok(())
        }
        fn timeout(&self) -> Duration {
            self.timeout
        }
        fn clear_buffers(&mut self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "mock"
        }
        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    fn cooperative_bootloader() -> Vec<u8> {
        let mut script = vec![control::READY; 3];
        script.extend_from_slice(&packet::encode_command_packet(b"1.0"));
        script.extend_from_slice(&[control::ACK; 3]); // header, data, EOT
        script
    }

    fn fast_config() -> UploadConfig {
        UploadConfig {
            ready_timeout: Duration::from_millis(100),
            header_timeout: Duration::from_millis(100),
            response_timeout: Duration::from_millis(50),
            ..UploadConfig::default()
        }
    }

    #[test]
    fn test_upload_transcodes_ws1080_image() {
        let image = FirmwareImage::new(0xE6, vec![0x00; 10]).unwrap();
        let mut flasher =
            ScannerFlasher::with_config(MockPort::new(&cooperative_bootloader()), fast_config())
                .with_cancel_flag(Arc::new(AtomicBool::new(false)));

        let report = flasher
            .upload(&image, true, |_, _| {})
            .expect("upload should complete");
        assert_eq!(report.bytes_sent, 10);

        // The wire saw the PRO-668 header, not the WS1080 one
        let port = flasher.into_port();
        let pro668_header = packet::encode_header_packet(0xE4, 10).unwrap();
        let ws1080_header = packet::encode_header_packet(0xE6, 10).unwrap();
        assert_eq!(port.count_written(&pro668_header), 1);
        assert_eq!(port.count_written(&ws1080_header), 0);
    }

    #[test]
    fn test_upload_no_transcode_sends_as_is() {
        let image = FirmwareImage::new(0xE6, vec![0x00; 10]).unwrap();
        let mut flasher =
            ScannerFlasher::with_config(MockPort::new(&cooperative_bootloader()), fast_config())
                .with_cancel_flag(Arc::new(AtomicBool::new(false)));

        flasher
            .upload(&image, false, |_, _| {})
            .expect("upload should complete");

        let port = flasher.into_port();
        let ws1080_header = packet::encode_header_packet(0xE6, 10).unwrap();
        assert_eq!(port.count_written(&ws1080_header), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut flasher = ScannerFlasher::new(MockPort::new(&[]));
        flasher.close();
        flasher.close();
        assert!(flasher.port().closed);
    }
}
