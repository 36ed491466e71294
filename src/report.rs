//! Periodic traffic reports and the sink they are written to.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};
use serde::Serialize;

use evtally_common::{TRAFFIC_SLOT_BYTES, TRAFFIC_SLOT_PACKETS};

use crate::slots::AggregateSlots;

/// Label used by the traffic monitor's report line.
pub const TRAFFIC_LABEL: &str = "Traffic stats";

/// Destination of report lines.
///
/// Delivery is best-effort: implementations may drop lines under load but
/// must never block the emitting handler.
pub trait ReportSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// Bounded in-memory trace buffer, the userspace stand-in for `trace_pipe`.
///
/// Lines that do not fit are dropped and counted.
pub struct TracePipe {
    tx: Sender<String>,
    dropped: AtomicU64,
}

impl TracePipe {
    pub fn bounded(capacity: usize) -> (Self, Receiver<String>) {
        let (tx, rx) = bounded(capacity);
        let pipe = Self {
            tx,
            dropped: AtomicU64::new(0),
        };
        (pipe, rx)
    }

    /// Lines dropped because the buffer was full or the reader had gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ReportSink for TracePipe {
    fn emit(&self, line: &str) {
        if self.tx.try_send(line.to_string()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Values read at trigger time.
///
/// Packets and bytes are read one after the other, so under concurrent
/// traffic they may be slightly inconsistent with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrafficReport<'a> {
    pub label: &'a str,
    pub packets: u64,
    pub bytes: u64,
}

impl fmt::Display for TrafficReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} packets, {} bytes",
            self.label, self.packets, self.bytes
        )
    }
}

/// Reads the traffic aggregate slots and writes one line to its sink.
pub struct Reporter {
    label: String,
    sink: Arc<dyn ReportSink>,
}

impl Reporter {
    pub fn new(label: impl Into<String>, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            label: label.into(),
            sink,
        }
    }

    pub fn report(&self, slots: &AggregateSlots) -> TrafficReport<'_> {
        let report = TrafficReport {
            label: &self.label,
            packets: slots.get(TRAFFIC_SLOT_PACKETS).unwrap_or(0),
            bytes: slots.get(TRAFFIC_SLOT_BYTES).unwrap_or(0),
        };
        self.sink.emit(&report.to_string());
        report
    }
}
