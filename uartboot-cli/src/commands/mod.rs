//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod flash;
pub(crate) mod monitor;
pub(crate) mod ports;
pub(crate) mod read;

use anyhow::Result;

use crate::{CliError, was_interrupted};

/// Fail with the cancelled exit class if Ctrl-C already fired.
pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("interrupted".to_string()).into())
    } else {
        Ok(())
    }
}
