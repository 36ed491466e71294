//! Packet counters.

use std::num::{NonZeroU32, NonZeroU64};
use std::sync::Arc;

use evtally_common::{TRAFFIC_SLOT_BYTES, TRAFFIC_SLOT_COUNT, TRAFFIC_SLOT_PACKETS};

use crate::error::EvtallyError;
use crate::probe::{PacketEvent, PacketProbe, XdpAction};
use crate::report::{ReportSink, Reporter, TrafficReport};
use crate::sampler::SamplingCounter;
use crate::slots::AggregateSlots;

/// Global packet and byte totals, with a report line every `threshold`
/// packets seen by the same worker.
pub struct TrafficMonitor {
    slots: AggregateSlots,
    reporter: Reporter,
    threshold: NonZeroU32,
}

impl TrafficMonitor {
    pub fn new(
        label: impl Into<String>,
        threshold: NonZeroU32,
        sink: Arc<dyn ReportSink>,
    ) -> Result<Self, EvtallyError> {
        Ok(Self {
            slots: AggregateSlots::new(TRAFFIC_SLOT_COUNT as usize)?,
            reporter: Reporter::new(label, sink),
            threshold,
        })
    }

    pub fn slots(&self) -> &AggregateSlots {
        &self.slots
    }

    pub fn packets(&self) -> u64 {
        self.slots.get(TRAFFIC_SLOT_PACKETS).unwrap_or(0)
    }

    pub fn bytes(&self) -> u64 {
        self.slots.get(TRAFFIC_SLOT_BYTES).unwrap_or(0)
    }

    /// Emit a report now, outside the sampling schedule.
    pub fn report(&self) -> TrafficReport<'_> {
        self.reporter.report(&self.slots)
    }
}

impl PacketProbe for TrafficMonitor {
    type Local = SamplingCounter;

    fn local(&self) -> SamplingCounter {
        SamplingCounter::new(self.threshold)
    }

    fn on_packet(&self, sampler: &mut SamplingCounter, pkt: &PacketEvent<'_>) -> XdpAction {
        // Bytes before packets; a reader may see the new size without the new packet.
        if let Err(e) = self.slots.add(TRAFFIC_SLOT_BYTES, pkt.len() as u64) {
            log::trace!("traffic: byte update failed: {e}");
        }
        if let Err(e) = self.slots.add(TRAFFIC_SLOT_PACKETS, 1) {
            log::trace!("traffic: packet update failed: {e}");
        }

        if sampler.tick() {
            self.reporter.report(&self.slots);
        }
        XdpAction::Pass
    }
}

/// Single global packet count, with a log line every `log_every` packets.
pub struct PacketCounter {
    slots: AggregateSlots,
    sink: Arc<dyn ReportSink>,
    log_every: NonZeroU64,
}

impl PacketCounter {
    pub fn new(log_every: NonZeroU64, sink: Arc<dyn ReportSink>) -> Result<Self, EvtallyError> {
        Ok(Self {
            slots: AggregateSlots::new(1)?,
            sink,
            log_every,
        })
    }

    pub fn count(&self) -> u64 {
        self.slots.get(0).unwrap_or(0)
    }
}

impl PacketProbe for PacketCounter {
    type Local = ();

    fn local(&self) {}

    fn on_packet(&self, _: &mut (), pkt: &PacketEvent<'_>) -> XdpAction {
        match self.slots.add(0, 1) {
            Ok(prev) => {
                let n = prev.wrapping_add(1);
                // The count comes from our own fetch_add, so exactly one
                // context sees each multiple.
                if n % self.log_every.get() == 0 {
                    self.sink.emit(&format!(
                        "XDP: Processed packet #{n}, Size: {} bytes",
                        pkt.len()
                    ));
                }
            }
            Err(e) => log::trace!("packet_counter: update failed: {e}"),
        }
        XdpAction::Pass
    }
}
