//! Firmware info command implementation.

use anyhow::{Context, Result};
use console::style;
use greflash::{FirmwareImage, MAX_CHUNK, Platform, TranscodeTable};
use std::path::Path;

/// Info command implementation.
pub(crate) fn cmd_info(firmware: &Path, json: bool) -> Result<()> {
    let data = std::fs::read(firmware)
        .with_context(|| format!("failed to read firmware file {}", firmware.display()))?;
    let image = FirmwareImage::from_bytes(&data)
        .with_context(|| format!("failed to parse firmware file {}", firmware.display()))?;

    if json {
        return print_json(&image);
    }

    eprintln!(
        "{} Firmware file: {}",
        style("📦").cyan(),
        firmware.display()
    );
    eprintln!("\n{}", style("Firmware Information").bold().underlined());
    eprintln!(
        "  Platform:     {} (0x{:02X})",
        style(image.platform().to_string()).cyan(),
        image.platform_code()
    );
    eprintln!("  Payload size: {} bytes", image.size());
    eprintln!(
        "  Data packets: {} (max {MAX_CHUNK} bytes each)",
        image.size().div_ceil(MAX_CHUNK)
    );

    match recovery_route(&image) {
        Some(route) => eprintln!("  Recovery:     {route}"),
        None => eprintln!(
            "  Recovery:     {} no transcoding route for this platform",
            style("⚠").yellow()
        ),
    }

    Ok(())
}

/// Info command --json output: structured JSON to stdout.
fn print_json(image: &FirmwareImage) -> Result<()> {
    let info = serde_json::json!({
        "platform": image.platform().name(),
        "platform_code": format!("0x{:02X}", image.platform_code()),
        "size": image.size(),
        "data_packets": image.size().div_ceil(MAX_CHUNK),
        "recovery_route": recovery_route(image),
    });

    println!(
        "{}",
        serde_json::to_string_pretty(&info).unwrap_or_default()
    );
    Ok(())
}

/// Describe how this image reaches a PRO-668, if it can.
fn recovery_route(image: &FirmwareImage) -> Option<String> {
    match image.platform() {
        Platform::Pro668 => Some("already PRO-668, uploaded as-is".to_string()),
        platform => TranscodeTable::for_platforms(platform, Platform::Pro668)
            .map(|_| format!("{platform} -> PRO-668 (transcoded)")),
    }
}
