//! Serial port listing command.

use anyhow::{Context, Result};
use console::style;
use uartboot::list_ports;

/// Ports command implementation.
///
/// JSON goes to stdout for machine consumption; the human listing goes to
/// stderr like all other status output.
pub(crate) fn cmd_ports(json: bool) -> Result<()> {
    let ports = list_ports().context("failed to enumerate serial ports")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_default()
        );
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("no serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        let usb_ids = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{usb_ids}{product}",
            style("•").green(),
            style(&port.name).cyan()
        );
    }

    Ok(())
}
