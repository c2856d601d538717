//! Upload command implementation.

use anyhow::{Context, Result};
use console::style;
use greflash::{Error, FirmwareImage, MAX_CHUNK, Platform, ScannerFlasher};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use crate::config::Config;
use crate::serial::resolve_port;
use crate::{Cli, CliError, use_fancy_output};

/// Upload command implementation.
pub(crate) fn cmd_upload(
    cli: &Cli,
    config: &Config,
    firmware: &Path,
    no_transcode: bool,
    json: bool,
) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware: {}",
            style("📦").cyan(),
            firmware.display()
        );
    }

    let data = std::fs::read(firmware)
        .with_context(|| format!("failed to read firmware file {}", firmware.display()))?;
    let image = FirmwareImage::from_bytes(&data)
        .with_context(|| format!("failed to parse firmware file {}", firmware.display()))?;

    if !cli.quiet {
        eprintln!(
            "    {} platform {} (0x{:02X}), {} bytes, {} data packet(s)",
            style("•").dim(),
            image.platform(),
            image.platform_code(),
            image.size(),
            image.size().div_ceil(MAX_CHUNK)
        );
        if no_transcode {
            eprintln!(
                "{} NO TRANSCODE mode - sending firmware as-is",
                style("⚠").yellow()
            );
        } else if image.platform() == Platform::Ws1080 {
            eprintln!(
                "    {} will be transcoded to PRO-668 before upload",
                style("•").dim()
            );
        }
    }

    let port = resolve_port(cli.port.as_deref(), config)?;
    let baud = cli.baud_rate(config);
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            port,
            baud
        );
    }

    let mut flasher = ScannerFlasher::open(&port, baud)
        .with_context(|| format!("failed to open serial port {port}"))?;

    if !cli.quiet {
        eprintln!(
            "{} Waiting for the bootloader... power cycle the scanner so it shows 'Waiting for USB'",
            style("⏳").yellow()
        );
    }

    // Progress bar over payload bytes
    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(image.size() as u64);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let result = flasher.upload(&image, !no_transcode, |bytes, packets| {
        pb.set_position(bytes as u64);
        pb.set_message(format!("packet {packets}"));
    });

    // The port is released on every exit path
    flasher.close();

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            pb.abandon_with_message("failed".to_string());
            if matches!(err.source, Error::Cancelled) {
                return Err(CliError::Cancelled("upload cancelled".to_string()).into());
            }
            return Err(err).context("firmware upload failed");
        },
    };

    pb.finish_with_message("complete".to_string());

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
    }

    if !cli.quiet {
        eprintln!(
            "\n{} Firmware upload successful! ({} bytes in {} packet(s), {} retransmission(s))",
            style("🎉").green().bold(),
            report.bytes_sent,
            report.packets_sent,
            report.retries
        );
        eprintln!("\nPower cycle your scanner now.");
        eprintln!("It should boot with the new firmware.");
    }

    Ok(())
}
