//! uartboot CLI - Command-line tool for driving a minimal UART flash bootloader.
//!
//! ## Features
//!
//! - Write raw firmware images to the application region
//! - Erase the application region
//! - Read flash back as a hex dump or raw file
//! - Hand control between bootloader and application
//! - Passive monitor for device log lines
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use uartboot::{EventSink, Flasher, NativePort, SerialConfig};

mod commands;
mod serial;

use commands::flash::JumpTarget;
use serial::{SerialOptions, select_serial_port};

/// uartboot - A cross-platform tool for driving a minimal UART flash bootloader.
///
/// Environment variables:
///   UARTBOOT_PORT              - Default serial port
///   UARTBOOT_BAUD              - Default baud rate (default: 115200)
///   UARTBOOT_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "uartboot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "UARTBOOT_PORT")]
    port: Option<String>,

    /// Baud rate for the serial link.
    #[arg(
        short,
        long,
        global = true,
        default_value = "115200",
        env = "UARTBOOT_BAUD"
    )]
    baud: u32,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "UARTBOOT_NON_INTERACTIVE")]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Erase the application region, then write a firmware image to it.
    Flash {
        /// Path to the raw firmware image (.bin).
        image: PathBuf,
    },

    /// Erase the application region.
    Erase {
        /// Confirm the erase (required).
        #[arg(long)]
        yes: bool,
    },

    /// Read flash memory back as a hex dump or raw file.
    Read {
        /// Start address (hex, e.g. 0x08008000).
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes to read.
        length: usize,

        /// Write raw bytes to this file instead of hex-dumping to stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Hand control from the bootloader to the application.
    JumpApp,

    /// Ask a running application to drop back into the bootloader.
    JumpBoot,

    /// Print device log lines until Ctrl-C.
    Monitor,

    /// List available serial ports.
    Ports {
        /// Output the port list as JSON to stdout.
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

/// Parse hexadecimal address (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    // Support underscore separators like 0x0800_8000
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

/// Classified CLI failures that map to distinct process exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or environment; exits 2.
    #[error("{0}")]
    Usage(String),
    /// Stopped by the user; exits 130.
    #[error("{0}")]
    Cancelled(String),
}

/// Set once the Ctrl-C handler fires.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Whether the user asked to stop.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Wire Ctrl-C to the cooperative abort flag.
///
/// The first interrupt lets the engine stop at the next block boundary; a
/// second one exits immediately.
fn install_ctrlc_handler() {
    uartboot::set_abort_checker(was_interrupted);
    let result = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!();
        eprintln!("Interrupt received, stopping...");
    });
    if let Err(e) = result {
        warn!("could not install Ctrl-C handler: {e}");
    }
}

fn main() {
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

    if std::env::var("NO_COLOR").is_ok() || !console::Term::stderr().is_term() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    debug!(
        "uartboot v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    install_ctrlc_handler();

    if let Err(err) = run(&cli) {
        let code = match err.downcast_ref::<CliError>() {
            Some(CliError::Usage(_)) => {
                eprintln!("{} {err}", style("Error:").red().bold());
                2
            }
            Some(CliError::Cancelled(_)) => {
                eprintln!("{} {err}", style("Cancelled:").yellow().bold());
                130
            }
            None => {
                eprintln!("{} {err:#}", style("Error:").red().bold());
                1
            }
        };
        std::process::exit(code);
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Flash { image } => commands::flash::cmd_flash(cli, image),
        Commands::Erase { yes } => commands::flash::cmd_erase(cli, *yes),
        Commands::Read {
            address,
            length,
            out,
        } => commands::read::cmd_read(cli, *address, *length, out.as_deref()),
        Commands::JumpApp => commands::flash::cmd_jump(cli, JumpTarget::Application),
        Commands::JumpBoot => commands::flash::cmd_jump(cli, JumpTarget::Bootloader),
        Commands::Monitor => commands::monitor::cmd_monitor(cli),
        Commands::Ports { json } => commands::ports::cmd_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        }
    }
}

/// Get serial port from CLI args or interactive selection.
fn get_port(cli: &Cli) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };
    let selected = select_serial_port(&options)?;
    Ok(selected.name)
}

/// Resolve the port and open a flasher over it.
pub(crate) fn open_flasher(cli: &Cli, events: EventSink) -> Result<Flasher<NativePort>> {
    let port = get_port(cli)?;
    if !cli.quiet {
        eprintln!(
            "{} using {} at {} baud",
            style("🔌").cyan(),
            style(&port).green(),
            cli.baud
        );
    }

    let config = SerialConfig::new(&port, cli.baud);
    let flasher =
        Flasher::open(&config, events).with_context(|| format!("failed to open {port}"))?;
    if !cli.quiet {
        eprintln!("{} connected", style("✓").green());
    }
    Ok(flasher)
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    // ---- clap validation ----

    #[test]
    fn test_cli_command_is_valid() {
        // Verifies that all derive macros produce a valid clap Command
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_flash() {
        let cli = Cli::try_parse_from([
            "uartboot",
            "--port",
            "/dev/ttyUSB0",
            "--baud",
            "460800",
            "flash",
            "app.bin",
        ]);
        assert!(cli.is_ok());
        let cli = cli.unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.baud, 460800);
        assert!(matches!(cli.command, Commands::Flash { .. }));
    }

    #[test]
    fn test_cli_default_baud() {
        let cli = Cli::try_parse_from(["uartboot", "ports"]).unwrap();
        assert_eq!(cli.baud, 115200);
    }

    #[test]
    fn test_cli_parse_erase() {
        let cli = Cli::try_parse_from(["uartboot", "erase", "--yes"]).unwrap();
        if let Commands::Erase { yes } = cli.command {
            assert!(yes);
        } else {
            panic!("Expected Erase command");
        }
    }

    #[test]
    fn test_cli_parse_read() {
        let cli =
            Cli::try_parse_from(["uartboot", "read", "0x0800_8000", "256", "--out", "dump.bin"])
                .unwrap();
        if let Commands::Read {
            address,
            length,
            out,
        } = cli.command
        {
            assert_eq!(address, 0x0800_8000);
            assert_eq!(length, 256);
            assert_eq!(out.unwrap().to_str().unwrap(), "dump.bin");
        } else {
            panic!("Expected Read command");
        }
    }

    #[test]
    fn test_cli_parse_read_rejects_bad_hex() {
        let cli = Cli::try_parse_from(["uartboot", "read", "wxyz", "16"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_cli_parse_jumps() {
        assert!(matches!(
            Cli::try_parse_from(["uartboot", "jump-app"]).unwrap().command,
            Commands::JumpApp
        ));
        assert!(matches!(
            Cli::try_parse_from(["uartboot", "jump-boot"]).unwrap().command,
            Commands::JumpBoot
        ));
    }

    #[test]
    fn test_cli_parse_ports_json() {
        let cli = Cli::try_parse_from(["uartboot", "ports", "--json"]).unwrap();
        if let Commands::Ports { json } = cli.command {
            assert!(json);
        } else {
            panic!("Expected Ports command");
        }
    }

    // ---- parse_hex_u32 ----

    #[test]
    fn test_parse_hex_with_prefix() {
        assert_eq!(parse_hex_u32("0x08008000").unwrap(), 0x0800_8000);
        assert_eq!(parse_hex_u32("0X08008000").unwrap(), 0x0800_8000);
    }

    #[test]
    fn test_parse_hex_without_prefix() {
        assert_eq!(parse_hex_u32("08008000").unwrap(), 0x0800_8000);
        assert_eq!(parse_hex_u32("ff").unwrap(), 0xFF);
    }

    #[test]
    fn test_parse_hex_with_underscores() {
        assert_eq!(parse_hex_u32("0x0800_8000").unwrap(), 0x0800_8000);
    }

    #[test]
    fn test_parse_hex_rejects_garbage() {
        assert!(parse_hex_u32("not-hex").is_err());
        assert!(parse_hex_u32("").is_err());
    }
}
