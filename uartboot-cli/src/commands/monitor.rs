//! Passive serial monitor: print decoded device log lines until Ctrl-C.

use std::io::{self, Write as _};
use std::time::Duration;

use anyhow::Result;
use console::style;
use uartboot::{Event, EventSink};

use crate::{Cli, open_flasher, was_interrupted};

/// How long each pump of the receive path blocks before rechecking Ctrl-C.
const POLL_WINDOW: Duration = Duration::from_millis(200);

/// Monitor command implementation.
///
/// The device stays in whatever mode it is in; nothing is written to the
/// wire. Log lines go to stdout so they can be piped, status to stderr.
pub(crate) fn cmd_monitor(cli: &Cli) -> Result<()> {
    let (events, rx) = EventSink::channel();
    let mut flasher = open_flasher(cli, events)?;

    eprintln!(
        "{} monitoring; press {} to exit",
        style("📡").cyan(),
        style("Ctrl-C").bold()
    );

    let mut stray_total = 0usize;
    while !was_interrupted() {
        let stray = match flasher.poll(POLL_WINDOW) {
            Ok(n) => n,
            Err(err) => {
                flasher.close();
                return Err(err.into());
            }
        };
        stray_total += stray;

        let mut wrote = false;
        for event in rx.try_iter() {
            if let Event::Log(line) = event {
                println!("{line}");
                wrote = true;
            }
        }
        if wrote {
            io::stdout().flush().ok();
        }
    }
    flasher.close();

    if stray_total > 0 && !cli.quiet {
        eprintln!(
            "{} ignored {stray_total} stray protocol byte(s)",
            style("ℹ").blue()
        );
    }

    Ok(())
}
