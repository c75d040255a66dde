//! Flash read-back command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use uartboot::EventSink;

use super::ensure_not_interrupted;
use crate::{Cli, CliError, open_flasher};

/// Read command implementation: fetch a flash range, then hex-dump it to
/// stdout or write the raw bytes to a file.
pub(crate) fn cmd_read(cli: &Cli, address: u32, length: usize, out: Option<&Path>) -> Result<()> {
    if length == 0 {
        return Err(CliError::Usage("length must be at least 1".to_string()).into());
    }
    let in_range = u32::try_from(length - 1)
        .ok()
        .and_then(|l| address.checked_add(l))
        .is_some();
    if !in_range {
        return Err(CliError::Usage(format!(
            "read range runs past the 32-bit address space ({length} bytes from {address:#010x})"
        ))
        .into());
    }

    let mut flasher = open_flasher(cli, EventSink::disabled())?;
    if let Err(err) = ensure_not_interrupted() {
        flasher.close();
        return Err(err);
    }

    if !cli.quiet {
        eprintln!(
            "{} reading {length} bytes from {address:#010x}",
            style("ℹ").blue()
        );
    }
    let data = match flasher.read_memory(address, length) {
        Ok(data) => data,
        Err(err) => {
            flasher.close();
            return Err(err.into());
        }
    };
    flasher.close();

    match out {
        Some(path) => {
            std::fs::write(path, &data)
                .with_context(|| format!("failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{} {} bytes written to {}",
                    style("✓").green(),
                    data.len(),
                    path.display()
                );
            }
        }
        None => hex_dump(address, &data),
    }

    Ok(())
}

fn hex_dump(base: u32, data: &[u8]) {
    let mut addr = base;
    for row in data.chunks(16) {
        println!("{}", dump_row(addr, row));
        // Row starts are in range; only the step past the final row of a
        // top-of-memory dump can wrap, and it is never printed.
        addr = addr.wrapping_add(16);
    }
}

/// One 16-byte hex dump row: address gutter, hex column, ASCII column.
fn dump_row(addr: u32, row: &[u8]) -> String {
    let hex: Vec<String> = row.iter().map(|b| format!("{b:02X}")).collect();
    let ascii: String = row
        .iter()
        .map(|&b| {
            if (0x20..0x7F).contains(&b) {
                b as char
            } else {
                '.'
            }
        })
        .collect();
    format!("{addr:08X}  {:<47}  |{ascii}|", hex.join(" "))
}
