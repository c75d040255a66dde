//! Flash, erase, and jump command implementations.

use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use uartboot::{Event, EventSink, FLASH_LAYOUT};

use super::ensure_not_interrupted;
use crate::{Cli, CliError, open_flasher};

/// Where a jump command sends the device.
#[derive(Clone, Copy)]
pub(crate) enum JumpTarget {
    Application,
    Bootloader,
}

/// Flash command implementation: erase the application region, then write
/// the image block by block.
pub(crate) fn cmd_flash(cli: &Cli, image: &Path) -> Result<()> {
    if !cli.quiet {
        eprintln!("{} loading {}", style("📦").cyan(), image.display());
    }

    let data =
        std::fs::read(image).with_context(|| format!("failed to read {}", image.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} {} bytes for {:#010x} ({} bytes available)",
            style("ℹ").blue(),
            data.len(),
            FLASH_LAYOUT.app_start(),
            FLASH_LAYOUT.app_capacity(),
        );
    }

    let (events, rx) = EventSink::channel();
    let mut flasher = open_flasher(cli, events)?;
    if let Err(err) = ensure_not_interrupted() {
        flasher.close();
        return Err(err);
    }

    if !cli.quiet {
        eprintln!("{} erasing application region...", style("🗑").red());
    }
    if let Err(err) = flasher.erase_application() {
        flasher.close();
        return Err(err.into());
    }
    if let Err(err) = ensure_not_interrupted() {
        flasher.close();
        return Err(err);
    }

    let pb = progress_bar(cli);
    pb.set_message("writing");

    // The engine owns the port for the whole job; progress and device
    // chatter come back over the event channel
    let worker = thread::spawn(move || {
        let result = flasher.write_firmware(&data);
        (flasher, result)
    });

    drain_events(&rx, &pb, || worker.is_finished());

    let (mut flasher, result) = worker
        .join()
        .map_err(|_| anyhow!("write worker panicked"))?;

    if let Err(err) = result {
        pb.finish_and_clear();
        flasher.close();
        return Err(err.into());
    }
    pb.finish_with_message("done");

    flasher.close();

    if !cli.quiet {
        eprintln!("\n{} firmware written", style("🎉").green().bold());
        eprintln!(
            "  run {} to start the application",
            style("uartboot jump-app").cyan()
        );
    }

    Ok(())
}

/// Erase command implementation.
pub(crate) fn cmd_erase(cli: &Cli, yes: bool) -> Result<()> {
    if !yes {
        if !cli.quiet {
            eprintln!(
                "{} this wipes the application region; pass {} to confirm",
                style("⚠").yellow(),
                style("--yes").cyan()
            );
        }
        return Err(CliError::Usage("erase requires --yes".to_string()).into());
    }

    let mut flasher = open_flasher(cli, EventSink::disabled())?;
    if let Err(err) = ensure_not_interrupted() {
        flasher.close();
        return Err(err);
    }

    if !cli.quiet {
        eprintln!("{} erasing application region...", style("🗑").red());
    }
    if let Err(err) = flasher.erase_application() {
        flasher.close();
        return Err(err.into());
    }
    flasher.close();

    if !cli.quiet {
        eprintln!("\n{} erase complete", style("✓").green().bold());
    }

    Ok(())
}

/// Jump command implementation.
pub(crate) fn cmd_jump(cli: &Cli, target: JumpTarget) -> Result<()> {
    let mut flasher = open_flasher(cli, EventSink::disabled())?;

    let (label, result) = match target {
        JumpTarget::Application => ("application", flasher.jump_to_application()),
        JumpTarget::Bootloader => ("bootloader", flasher.jump_to_bootloader()),
    };
    if let Err(err) = result {
        flasher.close();
        return Err(err.into());
    }
    flasher.close();

    if !cli.quiet {
        eprintln!("{} jump to {label} sent", style("🔄").cyan());
    }

    Ok(())
}

/// Pump engine events into the progress bar until the worker finishes,
/// then drain what is left so the final position lands.
fn drain_events(rx: &Receiver<Event>, pb: &ProgressBar, done: impl Fn() -> bool) {
    while !done() {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => handle_event(pb, &event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
    for event in rx.try_iter() {
        handle_event(pb, &event);
    }
}

fn handle_event(pb: &ProgressBar, event: &Event) {
    match event {
        Event::Progress { written, total } => {
            if *total > 0 {
                pb.set_position((written * 100 / total) as u64);
            }
        }
        Event::Log(line) => pb.println(format!("{} {line}", style("[device]").magenta())),
    }
}

fn progress_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || !console::Term::stderr().is_term() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    }
}
