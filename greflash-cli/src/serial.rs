//! Deterministic serial port resolution.
//!
//! Selection never prompts: an explicit `--port`, then the config file,
//! then a unique auto-detected candidate. Anything ambiguous is a usage
//! error listing the candidates, so scripts and CI behave predictably.

use crate::CliError;
use crate::config::Config;
use anyhow::Result;
use greflash::{DetectedPort, detect_ports, format_port_list};
use log::{debug, info};

fn usage_err(message: String) -> anyhow::Error {
    // Selection failures are setup issues, so they map to exit code 2.
    CliError::Usage(message).into()
}

/// Resolve the serial port to use for this invocation.
pub(crate) fn resolve_port(explicit: Option<&str>, config: &Config) -> Result<String> {
    if let Some(name) = explicit {
        return Ok(name.to_string());
    }

    if let Some(name) = &config.connection.serial {
        debug!("Using port from config: {name}");
        return Ok(name.clone());
    }

    let ports = detect_ports();
    if ports.is_empty() {
        return Err(usage_err(
            "no serial ports found; connect the scanner and specify one with --port".into(),
        ));
    }

    // Prefer ports behind a known USB-UART bridge
    let known: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| p.is_likely_scanner())
        .cloned()
        .collect();
    let candidates = if known.is_empty() { ports } else { known };

    if candidates.len() == 1 {
        let port = &candidates[0];
        info!("Auto-selected port: {} [{}]", port.name, port.device.name());
        return Ok(port.name.clone());
    }

    Err(usage_err(format!(
        "multiple candidate ports found:\n  {}\nselect one with --port",
        format_port_list(&candidates).join("\n  ")
    )))
}
