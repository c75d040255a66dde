//! # uartboot
//!
//! A library for driving a minimal UART flash bootloader.
//!
//! This crate provides the host side of a byte-oriented serial protocol for
//! reprogramming a microcontroller in the field, including:
//!
//! - Single-byte commands with ACK-gated multi-phase exchanges
//! - Chunked firmware writes with per-block retry
//! - Flash read-back and bootloader/application jumps
//! - A receive-path demultiplexer that separates interleaved device log
//!   lines from protocol bytes
//!
//! ## Features
//!
//! - `serde`: Serialization support for port metadata
//!
//! ## Example
//!
//! ```rust,no_run
//! use uartboot::{EventSink, Flasher, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (events, rx) = EventSink::channel();
//!     let config = SerialConfig::new("/dev/ttyUSB0", 115200);
//!     let mut flasher = Flasher::open(&config, events)?;
//!
//!     let image = std::fs::read("app.bin")?;
//!     flasher.erase_application()?;
//!     flasher.write_firmware(&image)?;
//!
//!     // Progress and device log lines arrive on the channel
//!     for event in rx.try_iter() {
//!         println!("{event:?}");
//!     }
//!
//!     flasher.jump_to_application()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod event;
pub mod flash;
pub mod flasher;
pub mod link;
pub mod port;
pub mod protocol;
pub mod wire;

static ABORT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global abort checker consulted by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). The write
/// pipeline consults it between blocks, so an aborted write never tears a
/// block exchange in half.
pub fn set_abort_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = ABORT_CHECKER.set(Arc::new(checker));
}

/// Returns whether an abort was requested by the embedding application.
#[must_use]
pub fn abort_requested() -> bool {
    ABORT_CHECKER.get().is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_aborted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_ABORT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_ABORT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_abort_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// The abort flag is process wide. A test that raises it must hold this
// lock and lower it again before releasing; tests whose operations consult
// the flag hold it too, so they always see it down.
#[cfg(test)]
pub(crate) fn abort_flag_guard() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, PoisonError};

    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

// Re-exports for convenience
pub use {
    error::{Error, Result},
    event::{Event, EventSink},
    flash::{FLASH_LAYOUT, FlashLayout, WriteJob},
    flasher::Flasher,
    link::Link,
    port::{
        NativePort, NativePortEnumerator, Port, PortEnumerator, PortInfo, SerialConfig, list_ports,
    },
    protocol::Exchange,
    wire::Command,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_checker_default_false() {
        let _guard = abort_flag_guard();
        test_set_aborted(false);
        assert!(!abort_requested());
    }

    #[test]
    fn test_abort_checker_toggle_true_false() {
        let _guard = abort_flag_guard();
        test_set_aborted(true);
        assert!(abort_requested());

        test_set_aborted(false);
        assert!(!abort_requested());
    }
}
