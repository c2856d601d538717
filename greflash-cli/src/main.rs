//! greflash CLI - recover bricked GRE/Whistler-platform radio scanners.
//!
//! ## Features
//!
//! - Upload firmware to a scanner stuck in its serial bootloader
//! - WS1080 -> PRO-668 platform transcoding
//! - Firmware file inspection
//! - Serial port auto-detection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Whether Ctrl-C was pressed.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Check whether the user asked to stop.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

mod commands;
mod config;
mod serial;

use commands::{cmd_info, cmd_list_ports, cmd_upload};
use config::Config;

/// greflash - firmware recovery for bricked GRE/Whistler-platform scanners.
///
/// Environment variables:
///   GREFLASH_PORT   - Default serial port
///   GREFLASH_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "greflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Put the scanner in bootloader mode (it shows 'Waiting for USB') before uploading.")]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "GREFLASH_PORT")]
    port: Option<String>,

    /// Baud rate for the bootloader link (default: 115200).
    #[arg(short, long, global = true, env = "GREFLASH_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload a firmware image to a scanner in bootloader mode.
    Upload {
        /// Path to the firmware file (e.g., WS1080e_U3.8.bin).
        firmware: PathBuf,

        /// Send the firmware without platform transcoding (diagnostic).
        #[arg(long)]
        no_transcode: bool,

        /// Print the upload report as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show information about a firmware file.
    Info {
        /// Path to the firmware file.
        firmware: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// CLI-level errors with dedicated exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or environment (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// User-initiated abort (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => 2,
        Some(CliError::Cancelled(_)) => 130,
        None => 1,
    }
}

fn main() {
    let code = match run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            exit_code_for(&err)
        },
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    // NO_COLOR and TTY detection (clig.dev best practice)
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "greflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Ctrl-C requests a clean abort between packets rather than killing the
    // process mid-transfer.
    let _ = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst));
    greflash::set_cancel_checker(was_interrupted);

    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Upload {
            firmware,
            no_transcode,
            json,
        } => {
            cmd_upload(&cli, &config, firmware, *no_transcode, *json)?;
        },
        Commands::Info { firmware, json } => {
            cmd_info(firmware, *json)?;
        },
        Commands::ListPorts { json } => {
            cmd_list_ports(*json);
        },
        Commands::Completions { shell } => {
            cmd_completions(*shell);
        },
    }

    Ok(())
}

impl Cli {
    /// Baud rate after applying flag, environment, and config fallbacks.
    fn baud_rate(&self, config: &Config) -> u32 {
        self.baud
            .or(config.connection.baud)
            .unwrap_or(greflash::DEFAULT_BAUD)
    }
}

/// Generate shell completions to stdout.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
