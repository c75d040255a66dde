//! Engine telemetry: progress and device log lines.

use std::sync::mpsc::{self, Receiver, Sender};

/// Telemetry published by the engine while an operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Event {
    /// Cumulative progress of a firmware write, in padded bytes.
    Progress {
        /// Bytes confirmed written so far.
        written: usize,
        /// Total padded bytes in the job.
        total: usize,
    },
    /// One decoded diagnostic line from the device, header and newline
    /// stripped.
    Log(String),
}

/// Non-blocking publisher for [`Event`]s.
///
/// Backed by an unbounded mpsc channel: `send` never blocks the engine,
/// and a receiver that was dropped (or never existed) is not an error.
/// Events arrive in detection order.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<Sender<Event>>,
}

impl EventSink {
    /// Create a sink and its receiving end.
    #[must_use]
    pub fn channel() -> (Self, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Publish one event, best-effort.
    pub fn send(&self, event: Event) {
        if let Some(ref tx) = self.tx {
            let _ = tx.send(event);
        }
    }

    pub(crate) fn progress(&self, written: usize, total: usize) {
        self.send(Event::Progress { written, total });
    }

    pub(crate) fn log(&self, line: String) {
        self.send(Event::Log(line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (sink, rx) = EventSink::channel();
        sink.progress(128, 256);
        sink.log("hello".to_string());
        sink.progress(256, 256);

        assert_eq!(
            rx.try_recv().unwrap(),
            Event::Progress {
                written: 128,
                total: 256
            }
        );
        assert_eq!(rx.try_recv().unwrap(), Event::Log("hello".to_string()));
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::Progress {
                written: 256,
                total: 256
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_survives_dropped_receiver() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.log("nobody listening".to_string());
    }

    #[test]
    fn test_disabled_sink_is_silent() {
        let sink = EventSink::disabled();
        sink.progress(1, 2);
        sink.log("discarded".to_string());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_events_serialize_to_json() {
        let progress = Event::Progress {
            written: 128,
            total: 256,
        };
        let json = serde_json::to_string(&progress).unwrap();
        assert!(json.contains("\"written\":128"));

        let log = Event::Log("boot ok".to_string());
        assert_eq!(serde_json::to_string(&log).unwrap(), r#"{"Log":"boot ok"}"#);
    }
}
