//! Interactive serial port selection.
//!
//! Resolution order: an explicitly named port wins, a single detected
//! candidate is auto-selected, and anything else falls back to an
//! interactive picker (TTY only). Non-interactive mode never prompts.

use {
    crate::CliError,
    anyhow::{Context, Result},
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::info,
    std::{cmp::Ordering, io::IsTerminal},
    uartboot::{PortInfo, list_ports},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI or environment.
    pub port: Option<String>,
    /// Non-interactive mode (fail if zero or multiple ports).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    // Selection failures are usage/setup errors so they map to CLI exit
    // code 2 (instead of generic runtime code 1). Script callers branch
    // on this.
    CliError::Usage(message.to_string()).into()
}

/// Select a serial port explicitly, automatically, or interactively.
pub fn select_serial_port(options: &SerialOptions) -> Result<PortInfo> {
    // If port explicitly specified, use it
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name));
    }

    let ports = list_ports().context("failed to enumerate serial ports")?;

    // Non-interactive mode must never prompt
    if options.non_interactive {
        return select_non_interactive_port(ports);
    }

    match ports.len().cmp(&1) {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(ports)
        }
        Ordering::Equal => {
            let port = ports
                .into_iter()
                .next()
                .expect("ports has exactly 1 element here");
            info!("auto-selected port: {}", port.name);
            Ok(port)
        }
        Ordering::Less => Err(usage_err("no serial ports found")),
    }
}

fn select_non_interactive_port(ports: Vec<PortInfo>) -> Result<PortInfo> {
    // Deterministic: exactly one candidate is a valid auto-selection,
    // zero or several are setup issues.
    match ports.len().cmp(&1) {
        Ordering::Equal => Ok(ports
            .into_iter()
            .next()
            .expect("ports has exactly 1 element here")),
        Ordering::Greater => Err(usage_err(
            "multiple serial ports found, pass --port to pick one",
        )),
        Ordering::Less => Err(usage_err("no serial ports found")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(
            "several ports detected and no terminal to ask on, pass --port".to_string(),
        )
        .into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("port selection cancelled".to_string()).into()
            } else {
                CliError::Usage("port selection prompt failed".to_string()).into()
            }
        }
    }
}

/// Find a port by name.
fn find_port_by_name(name: &str) -> PortInfo {
    let ports = list_ports().unwrap_or_default();

    // Try exact match first
    if let Some(port) = ports.iter().find(|p| p.name == name) {
        return port.clone();
    }

    // Try case-insensitive match (Windows)
    if let Some(port) = ports.iter().find(|p| p.name.eq_ignore_ascii_case(name)) {
        return port.clone();
    }

    // Not in the detected list, but the user explicitly asked for it;
    // let the open call decide whether it exists
    PortInfo {
        name: name.to_string(),
        vid: None,
        pid: None,
        manufacturer: None,
        product: None,
        serial_number: None,
    }
}

/// One line of the interactive picker.
fn port_label(port: &PortInfo) -> String {
    let usb_ids = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };
    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();
    format!("{}{usb_ids}{product}", port.name)
}

/// Interactive port selection.
fn select_port_interactive(ports: Vec<PortInfo>) -> Result<PortInfo> {
    eprintln!(
        "{} {} serial ports detected",
        style("ℹ").blue(),
        ports.len()
    );

    // Truncate labels to the terminal width so the picker never wraps
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("port selection cancelled".to_string()).into()),
    }
}
