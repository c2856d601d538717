//! Upload state machine for the GRE bootloader protocol.
//!
//! Drives one complete firmware upload over an already-open byte channel:
//!
//! ```text
//! AwaitingBootloader -> QueryingVersion -> SendingHeader -> SendingData
//!        -> SendingEot -> done
//! ```
//!
//! Every step that depends on the device responding is timeout-bounded and
//! retry-bounded; a bricked scanner's bootloader must never be able to hang
//! the process. CAN from the bootloader is immediately fatal at any
//! acknowledgement point. NAK and timeouts are retried up to a fixed ceiling
//! per packet, with the counter reset at each new packet.
//!
//! The terminal states are the `Result`: `Ok(UploadReport)` for a completed
//! transfer, `Err(UploadError)` tagged with the failing phase and the number
//! of data packets already acknowledged.

use crate::error::Error;
use crate::image::FirmwareImage;
use crate::protocol::packet::{self, MAX_CHUNK, control};
use log::{debug, trace, warn};
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error as ThisError;

/// Phases of an upload attempt, used to tag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum UploadPhase {
    /// Pre-protocol preparation: transcoding and port conditioning.
    Preparing,
    /// Waiting for the bootloader's repeated ready probe.
    AwaitingBootloader,
    /// Version-query handshake.
    QueryingVersion,
    /// Transmitting the firmware header packet.
    SendingHeader,
    /// Streaming firmware data packets.
    SendingData,
    /// Transmitting the end-of-transmission signal.
    SendingEot,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preparing => "preparing image",
            Self::AwaitingBootloader => "awaiting bootloader",
            Self::QueryingVersion => "querying version",
            Self::SendingHeader => "sending header",
            Self::SendingData => "sending data",
            Self::SendingEot => "sending EOT",
        };
        write!(f, "{name}")
    }
}

/// Acknowledgement cadence during data transfer.
///
/// The bootloader variants in the field differ in whether they pace the
/// sender with an explicit ENQ before every packet or only acknowledge each
/// packet after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckCadence {
    /// Send each packet, then wait for ACK (or ENQ, treated the same).
    #[default]
    AckPerPacket,
    /// Wait for ENQ before sending each packet, then wait for ACK.
    EnquireBeforeData,
}

/// Upload protocol configuration.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Deadline for the bootloader's ready probes to appear.
    pub ready_timeout: Duration,
    /// Number of ready probe characters required before proceeding.
    pub ready_probes: u32,
    /// Deadline for the header acknowledgement (the bootloader erases
    /// flash after the header, which takes a while).
    pub header_timeout: Duration,
    /// Deadline for each control-byte response during transfer.
    pub response_timeout: Duration,
    /// Maximum transmissions per header/data packet before giving up.
    pub max_retries: u32,
    /// Acknowledgement cadence variant.
    pub cadence: AckCadence,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
            ready_probes: 3,
            header_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(5),
            max_retries: 3,
            cadence: AckCadence::default(),
        }
    }
}

/// Summary of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UploadReport {
    /// Data packets acknowledged by the bootloader.
    pub packets_sent: usize,
    /// Payload bytes acknowledged by the bootloader.
    pub bytes_sent: usize,
    /// Total payload size of the uploaded image.
    pub image_size: usize,
    /// Packet retransmissions across the whole session.
    pub retries: u32,
    /// Wall-clock duration of the upload.
    pub elapsed: Duration,
}

/// A failed upload, tagged with the phase it failed in and how far it got.
#[derive(Debug, ThisError)]
#[error("upload failed while {phase} after {packets_sent} data packet(s): {source}")]
pub struct UploadError {
    /// Phase during which the failure occurred.
    pub phase: UploadPhase,
    /// Data packets acknowledged before the failure.
    pub packets_sent: usize,
    /// Underlying failure.
    #[source]
    pub source: Error,
}

/// Per-upload transfer record. One per attempt, never shared or persisted.
#[derive(Debug)]
struct TransferSession {
    phase: UploadPhase,
    packets_sent: usize,
    bytes_sent: usize,
    retries_total: u32,
}

impl TransferSession {
    fn new() -> Self {
        Self {
            phase: UploadPhase::AwaitingBootloader,
            packets_sent: 0,
            bytes_sent: 0,
            retries_total: 0,
        }
    }
}

/// Outcome of one acknowledged data packet.
enum PacketOutcome {
    /// Bootloader accepted the packet; continue with the next.
    Acknowledged,
    /// Bootloader declared the update complete (EOT) mid-stream.
    DeviceComplete,
}

/// Header acknowledgement outcome.
enum HeaderAck {
    /// ACK or ENQ observed; proceed to data.
    Accepted,
    /// NAK observed; resend the header.
    Resend,
}

/// Drives one firmware upload over a duplex byte channel.
///
/// Generic over `Read + Write` so the protocol can be exercised against a
/// scripted transport in tests; production use goes through
/// [`ScannerFlasher`](crate::flasher::ScannerFlasher), which supplies a real
/// serial port.
pub struct FirmwareUploader<'a, P: Read + Write> {
    port: &'a mut P,
    config: UploadConfig,
    cancel: Option<Arc<AtomicBool>>,
    session: TransferSession,
}

impl<'a, P: Read + Write> FirmwareUploader<'a, P> {
    /// Create an uploader with default configuration.
    pub fn new(port: &'a mut P) -> Self {
        Self::with_config(port, UploadConfig::default())
    }

    /// Create an uploader with custom configuration.
    pub fn with_config(port: &'a mut P, config: UploadConfig) -> Self {
        Self {
            port,
            config,
            cancel: None,
            session: TransferSession::new(),
        }
    }

    /// Use an explicit cancellation flag instead of the library-global
    /// checker registered via [`crate::set_cancel_checker`].
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Upload an image, reporting progress as `(bytes_sent, packet_index)`.
    ///
    /// The image must already carry the platform tag the bootloader expects;
    /// transcoding happens before the uploader is involved.
    pub fn upload<F>(
        &mut self,
        image: &FirmwareImage,
        mut progress: F,
    ) -> Result<UploadReport, UploadError>
    where
        F: FnMut(usize, usize),
    {
        let started = Instant::now();
        self.session = TransferSession::new();

        self.await_bootloader().map_err(|e| self.fail(e))?;

        self.session.phase = UploadPhase::QueryingVersion;
        self.query_version().map_err(|e| self.fail(e))?;

        self.session.phase = UploadPhase::SendingHeader;
        self.send_header(image).map_err(|e| self.fail(e))?;

        self.session.phase = UploadPhase::SendingData;
        let device_complete = self
            .send_data(image, &mut progress)
            .map_err(|e| self.fail(e))?;

        if !device_complete {
            self.session.phase = UploadPhase::SendingEot;
            self.send_eot().map_err(|e| self.fail(e))?;
        }

        debug!(
            "Upload complete: {} packet(s), {} byte(s), {} retransmission(s)",
            self.session.packets_sent, self.session.bytes_sent, self.session.retries_total
        );

        Ok(UploadReport {
            packets_sent: self.session.packets_sent,
            bytes_sent: self.session.bytes_sent,
            image_size: image.size(),
            retries: self.session.retries_total,
            elapsed: started.elapsed(),
        })
    }

    fn fail(&self, source: Error) -> UploadError {
        UploadError {
            phase: self.session.phase,
            packets_sent: self.session.packets_sent,
            source,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or_else(crate::is_cancel_requested, |flag| {
                flag.load(Ordering::Relaxed)
            })
    }

    /// Read a single byte, mapping the transport's timeout to [`Error::Timeout`].
    fn read_byte(&mut self) -> Result<u8, Error> {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(1) => Ok(buf[0]),
            Ok(_) => Err(Error::Timeout("read: no data".into())),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                Err(Error::Timeout("read: timeout".into()))
            },
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    /// Wait for the bootloader's repeated ready probe characters.
    fn await_bootloader(&mut self) -> Result<(), Error> {
        debug!("Waiting for bootloader ready signal...");
        let start = Instant::now();
        let mut probes = 0u32;

        while start.elapsed() < self.config.ready_timeout {
            match self.read_byte() {
                Ok(control::READY) => {
                    probes += 1;
                    if probes >= self.config.ready_probes {
                        debug!("Bootloader ready ({probes} probe characters)");
                        return Ok(());
                    }
                },
                Ok(b) => trace!("Ignoring 0x{b:02X} while waiting for bootloader"),
                Err(Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }
        }

        Err(Error::Timeout(format!(
            "no bootloader ready signal within {:?}",
            self.config.ready_timeout
        )))
    }

    /// Send the version query and validate the reply.
    ///
    /// A live bootloader with no firmware answers with an STX/ETX-framed
    /// version string, which is then acknowledged. Anything else means we
    /// are not talking to the expected bootloader.
    fn query_version(&mut self) -> Result<(), Error> {
        debug!("Querying bootloader version...");
        self.write_all(&packet::encode_command_packet(b"V"))?;

        let reply = self.drain_reply()?;
        if reply.is_empty() {
            return Err(Error::UnexpectedResponse(
                "no reply to version query".into(),
            ));
        }

        let framed = reply
            .iter()
            .position(|b| *b == control::STX)
            .is_some_and(|stx| reply[stx..].contains(&control::ETX));
        if !framed {
            return Err(Error::UnexpectedResponse(format!(
                "unrecognized version reply: {reply:02X?}"
            )));
        }

        debug!("Version reply: {reply:02X?}");
        self.write_all(&[control::ACK])
    }

    /// Collect one reply frame, stopping at the checksum byte after ETX or
    /// when the line goes quiet.
    fn drain_reply(&mut self) -> Result<Vec<u8>, Error> {
        let start = Instant::now();
        let mut reply = Vec::new();

        while start.elapsed() < self.config.response_timeout {
            match self.read_byte() {
                Ok(b) => {
                    let frame_end = b == control::ETX && reply.contains(&control::STX);
                    reply.push(b);
                    if frame_end {
                        if let Ok(check) = self.read_byte() {
                            reply.push(check);
                        }
                        break;
                    }
                },
                Err(Error::Timeout(_)) if !reply.is_empty() => break,
                Err(Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }
        }

        Ok(reply)
    }

    /// Transmit the header packet with bounded retry.
    fn send_header(&mut self, image: &FirmwareImage) -> Result<(), Error> {
        let header = packet::encode_header_packet(image.platform_code(), image.size())?;
        debug!(
            "Sending firmware header: platform=0x{:02X}, size={} (0x{:06X})",
            image.platform_code(),
            image.size(),
            image.size()
        );

        let mut nak_seen = false;
        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                self.session.retries_total += 1;
                debug!(
                    "Resending header (attempt {}/{})",
                    attempt + 1,
                    self.config.max_retries
                );
            }

            self.write_all(&header)?;

            match self.await_header_ack() {
                Ok(HeaderAck::Accepted) => return Ok(()),
                Ok(HeaderAck::Resend) => nak_seen = true,
                Err(Error::Timeout(_)) => nak_seen = false,
                Err(e) => return Err(e),
            }
        }

        if nak_seen {
            Err(Error::RetryLimitExceeded {
                attempts: self.config.max_retries,
            })
        } else {
            Err(Error::Timeout(format!(
                "no header acknowledgement after {} attempts",
                self.config.max_retries
            )))
        }
    }

    /// Wait for the header acknowledgement.
    ///
    /// DLE ("update starting") and residual ready probes are ignored; only
    /// ACK/ENQ, NAK, CAN or the deadline end the wait.
    fn await_header_ack(&mut self) -> Result<HeaderAck, Error> {
        let start = Instant::now();

        while start.elapsed() < self.config.header_timeout {
            match self.read_byte() {
                Ok(control::ACK) => {
                    debug!("Header acknowledged");
                    return Ok(HeaderAck::Accepted);
                },
                Ok(control::ENQ) => {
                    debug!("Bootloader ready for data");
                    return Ok(HeaderAck::Accepted);
                },
                Ok(control::NAK) => {
                    warn!("Header rejected (NAK)");
                    return Ok(HeaderAck::Resend);
                },
                Ok(control::CAN) => return Err(Error::Rejected),
                Ok(control::DLE) => debug!("DLE - update starting"),
                Ok(control::READY) => trace!("Bootloader still probing"),
                Ok(b) => trace!("Ignoring 0x{b:02X} while awaiting header acknowledgement"),
                Err(Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }
        }

        Err(Error::Timeout(
            "no header acknowledgement within deadline".into(),
        ))
    }

    /// Stream the firmware payload in bounded-size packets.
    ///
    /// Returns `true` when the bootloader declared the update complete
    /// mid-stream (EOT from the device), in which case no EOT of our own is
    /// sent.
    fn send_data<F>(&mut self, image: &FirmwareImage, progress: &mut F) -> Result<bool, Error>
    where
        F: FnMut(usize, usize),
    {
        let total = image.size();
        debug!("Sending firmware data ({total} bytes)...");

        for chunk in image.payload().chunks(MAX_CHUNK) {
            // Cancellation is only honored between packets so the wire is
            // never left with a half-transmitted frame.
            if self.cancelled() {
                warn!("Cancellation requested, aborting transfer");
                let _ = self.write_all(&[control::CAN]);
                return Err(Error::Cancelled);
            }

            if self.config.cadence == AckCadence::EnquireBeforeData {
                self.await_enquiry()?;
            }

            let data_packet = packet::encode_data_packet(chunk)?;
            match self.send_data_packet(&data_packet)? {
                PacketOutcome::Acknowledged => {
                    self.session.packets_sent += 1;
                    self.session.bytes_sent += chunk.len();
                    trace!(
                        "Packet {} acknowledged ({}/{} bytes)",
                        self.session.packets_sent, self.session.bytes_sent, total
                    );
                    progress(self.session.bytes_sent, self.session.packets_sent);
                },
                PacketOutcome::DeviceComplete => {
                    debug!("Bootloader signalled EOT mid-stream; update complete");
                    return Ok(true);
                },
            }
        }

        Ok(false)
    }

    /// Transmit one data packet with bounded retry.
    ///
    /// The retry counter is per packet; exhaustion is always
    /// [`Error::RetryLimitExceeded`] here, unlike the header.
    fn send_data_packet(&mut self, data_packet: &[u8]) -> Result<PacketOutcome, Error> {
        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                self.session.retries_total += 1;
                debug!(
                    "Retrying packet {} (attempt {}/{})",
                    self.session.packets_sent + 1,
                    attempt + 1,
                    self.config.max_retries
                );
            }

            self.write_all(data_packet)?;

            match self.await_packet_ack() {
                Ok(outcome) => return Ok(outcome),
                // NAK, line noise, or silence: retry the same packet
                Err(Error::UnexpectedResponse(_) | Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }
        }

        Err(Error::RetryLimitExceeded {
            attempts: self.config.max_retries,
        })
    }

    /// Wait for a single acknowledgement byte for a data packet.
    fn await_packet_ack(&mut self) -> Result<PacketOutcome, Error> {
        let start = Instant::now();

        while start.elapsed() < self.config.response_timeout {
            match self.read_byte() {
                Ok(control::ACK | control::ENQ) => return Ok(PacketOutcome::Acknowledged),
                Ok(control::EOT) => return Ok(PacketOutcome::DeviceComplete),
                Ok(control::NAK) => {
                    return Err(Error::UnexpectedResponse("NAK".into()));
                },
                Ok(control::CAN) => return Err(Error::Rejected),
                Ok(b) => {
                    return Err(Error::UnexpectedResponse(format!(
                        "unrecognized control byte 0x{b:02X}"
                    )));
                },
                Err(Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }
        }

        Err(Error::Timeout("no acknowledgement within deadline".into()))
    }

    /// Wait for the bootloader's explicit ready-for-packet enquiry.
    fn await_enquiry(&mut self) -> Result<(), Error> {
        let start = Instant::now();

        while start.elapsed() < self.config.response_timeout {
            match self.read_byte() {
                Ok(control::ENQ) => return Ok(()),
                Ok(control::CAN) => return Err(Error::Rejected),
                Ok(b) => trace!("Ignoring 0x{b:02X} while awaiting enquiry"),
                Err(Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }
        }

        Err(Error::Timeout("no enquiry within deadline".into()))
    }

    /// Transmit the end-of-transmission signal with bounded retry.
    fn send_eot(&mut self) -> Result<(), Error> {
        debug!("Sending EOT");

        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                self.session.retries_total += 1;
            }

            self.write_all(&[control::EOT])?;

            let start = Instant::now();
            while start.elapsed() < self.config.response_timeout {
                match self.read_byte() {
                    // The bootloader answers with ACK, or echoes EOT on
                    // some firmware revisions.
                    Ok(control::ACK | control::EOT) => {
                        debug!("EOT acknowledged");
                        return Ok(());
                    },
                    Ok(control::CAN) => return Err(Error::Rejected),
                    Ok(control::NAK) => break,
                    Ok(b) => trace!("Ignoring 0x{b:02X} while awaiting EOT acknowledgement"),
                    Err(Error::Timeout(_)) => {},
                    Err(e) => return Err(e),
                }
            }
        }

        Err(Error::Timeout(format!(
            "no EOT acknowledgement after {} attempts",
            self.config.max_retries
        )))
    }
}
