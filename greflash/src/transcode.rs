//! Platform-to-platform firmware transcoding.
//!
//! Several GRE-built scanners (PRO-668, WS1080, PSR-800, Pro-18) are the
//! same hardware sold under different platform codes. Their firmware images
//! differ only by a fixed byte transformation: each payload byte is XORed
//! with a 256-byte table indexed by `offset % 256`. Because XOR is its own
//! inverse, the same table maps each direction between a platform pair.

use crate::error::{Error, Result};
use crate::image::{FirmwareImage, Platform};

/// XOR table for transcoding WS1080 (0xE6) firmware to PRO-668 (0xE4).
///
/// Table bytes derived from GREFwTool by Eric A. Cottrell (WB1HBU).
pub static WS1080_TO_PRO668: TranscodeTable = TranscodeTable::new(
    0xE6,
    0xE4,
    [
        0x08, 0x40, 0x08, 0x40, 0x08, 0x40, 0x89, 0x48, 0x89, 0x48, 0x89, 0x48, 0x89, 0x48, 0x08,
        0x40, 0x08, 0x40, 0x08, 0x40, 0x08, 0x40, 0xF7, 0xDF, 0xF7, 0xDF, 0xF7, 0xDF, 0xF7, 0xDF,
        0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8, 0x18, 0xC0, 0x18, 0xC0, 0x18, 0xC0, 0x18,
        0xC0, 0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8, 0x0A, 0xF1, 0x0A, 0xF1, 0x0A, 0xF1,
        0x0A, 0xF1, 0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8, 0x18, 0xC0, 0x18, 0xC0, 0x18,
        0xC0, 0x18, 0xC0, 0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8, 0x2E, 0x93, 0x2E, 0x93,
        0x2E, 0x93, 0x2E, 0x93, 0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8, 0x18, 0xC0, 0x18,
        0xC0, 0x18, 0xC0, 0x18, 0xC0, 0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8, 0x0A, 0xF1,
        0x0A, 0xF1, 0x0A, 0xF1, 0x0A, 0xF1, 0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8, 0x18,
        0xC0, 0x18, 0xC0, 0x18, 0xC0, 0x18, 0xC0, 0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8, 0x99, 0xC8,
        0xF7, 0xDF, 0xF7, 0xDF, 0xF7, 0xDF, 0xF7, 0xDF, 0x08, 0x40, 0x08, 0x40, 0x08, 0x40, 0x08,
        0x40, 0x89, 0x48, 0x89, 0x48, 0x89, 0x48, 0x89, 0x48, 0x08, 0x40, 0x08, 0x40, 0x08, 0x40,
        0x08, 0x40, 0x9B, 0x79, 0x9B, 0x79, 0x9B, 0x79, 0x9B, 0x79, 0x08, 0x40, 0x08, 0x40, 0x08,
        0x40, 0x08, 0x40, 0x89, 0x48, 0x89, 0x48, 0x89, 0x48, 0x89, 0x48, 0x08, 0x40, 0x08, 0x40,
        0x08, 0x40, 0x08, 0x40, 0xBF, 0x1B, 0xBF, 0x1B, 0xBF, 0x1B, 0xBF, 0x1B, 0x08, 0x40, 0x08,
        0x40, 0x08, 0x40, 0x08, 0x40, 0x89, 0x48, 0x89, 0x48, 0x89, 0x48, 0x89, 0x48, 0x08, 0x40,
        0x08, 0x40, 0x08, 0x40, 0x08, 0x40, 0x9B, 0x79, 0x9B, 0x79, 0x9B, 0x79, 0x9B, 0x79, 0x08,
        0x40,
    ],
);

/// A fixed 256-byte XOR table mapping one platform's firmware to another's.
#[derive(Debug, Clone, Copy)]
pub struct TranscodeTable {
    source: u8,
    target: u8,
    table: [u8; 256],
}

impl TranscodeTable {
    /// Create a table mapping `source`-tagged images to `target`.
    pub const fn new(source: u8, target: u8, table: [u8; 256]) -> Self {
        Self {
            source,
            target,
            table,
        }
    }

    /// Look up the table for a (source, target) platform pair.
    #[must_use]
    pub fn for_platforms(source: Platform, target: Platform) -> Option<Self> {
        let (source, target) = (source.code(), target.code());
        if source == WS1080_TO_PRO668.source && target == WS1080_TO_PRO668.target {
            Some(WS1080_TO_PRO668)
        } else if source == WS1080_TO_PRO668.target && target == WS1080_TO_PRO668.source {
            Some(WS1080_TO_PRO668.reversed())
        } else {
            None
        }
    }

    /// Source platform code this table applies to.
    pub fn source(&self) -> u8 {
        self.source
    }

    /// Platform code the output is tagged with.
    pub fn target(&self) -> u8 {
        self.target
    }

    /// The same transformation in the opposite direction.
    ///
    /// XOR is self-inverse, so only the platform tags swap.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            source: self.target,
            target: self.source,
            table: self.table,
        }
    }

    /// Transcode an image to this table's target platform.
    ///
    /// Fails with [`Error::PlatformMismatch`] unless the image carries this
    /// table's source platform tag. The input is left untouched; the result
    /// is a new image with the same payload length.
    pub fn apply(&self, image: &FirmwareImage) -> Result<FirmwareImage> {
        if image.platform_code() != self.source {
            return Err(Error::PlatformMismatch {
                expected: self.source,
                actual: image.platform_code(),
            });
        }

        let payload: Vec<u8> = image
            .payload()
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ self.table[i % self.table.len()])
            .collect();

        FirmwareImage::new(self.target, payload)
    }
}
