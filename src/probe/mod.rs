//! Event handlers.
//!
//! Handlers are fire-and-forget: they mutate shared tables, may emit a
//! report, and swallow every internal error. Nothing is returned to the
//! event source except the packet verdict.

pub mod exec;
pub mod traffic;

use evtally_common::ExecEvent;

use crate::protocol::Update;

pub use exec::{ExecCountByComm, ExecCountByPid, ExecInfoByPid, ProcIdentity};
pub use traffic::{PacketCounter, TrafficMonitor};

/// Verdict returned to the packet path, same values as the kernel's `xdp_action`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XdpAction {
    Aborted = 0,
    Drop = 1,
    Pass = 2,
    Tx = 3,
    Redirect = 4,
}

/// Raw packet buffer with start/end offsets, as handed to an XDP program.
#[derive(Debug, Clone, Copy)]
pub struct PacketEvent<'a> {
    buf: &'a [u8],
    start: usize,
    end: usize,
}

impl<'a> PacketEvent<'a> {
    pub fn new(buf: &'a [u8], start: usize, end: usize) -> Self {
        Self { buf, start, end }
    }

    pub fn whole(buf: &'a [u8]) -> Self {
        Self::new(buf, 0, buf.len())
    }

    /// `end - start`, or zero for inverted offsets.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Packet bytes, or an empty slice when the offsets fall outside the buffer.
    pub fn data(&self) -> &'a [u8] {
        self.buf.get(self.start..self.end).unwrap_or(&[])
    }
}

/// Handler attached to process creation.
pub trait ExecProbe: Send + Sync {
    fn on_exec(&self, ev: &ExecEvent);
}

/// Handler attached to packet arrival.
///
/// `Local` is the per-execution-context state (for example a sampling
/// counter). Each worker creates its own with `local()` and never shares it.
pub trait PacketProbe: Send + Sync {
    type Local: Send;

    fn local(&self) -> Self::Local;

    fn on_packet(&self, local: &mut Self::Local, pkt: &PacketEvent<'_>) -> XdpAction;
}

/// Trace the outcomes a handler swallows.
fn note(probe: &str, update: Update) {
    match update {
        Update::Dropped(e) => log::trace!("{probe}: event dropped: {e} (code {})", e.code()),
        Update::Overwritten => log::trace!("{probe}: count overwritten by a late create"),
        Update::Created | Update::Incremented(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ut_packet_len_from_offsets() {
        let buf = [0u8; 1500];
        assert_eq!(PacketEvent::new(&buf, 14, 114).len(), 100);
        assert_eq!(PacketEvent::whole(&buf).len(), 1500);
    }

    #[test]
    fn ut_packet_inverted_offsets_empty() {
        let buf = [0u8; 64];
        let pkt = PacketEvent::new(&buf, 40, 20);
        assert!(pkt.is_empty());
        assert!(pkt.data().is_empty());
    }

    #[test]
    fn ut_packet_data_out_of_bounds() {
        let buf = [1u8; 10];
        let pkt = PacketEvent::new(&buf, 2, 30);
        assert_eq!(pkt.len(), 28);
        assert!(pkt.data().is_empty());
        assert_eq!(PacketEvent::new(&buf, 2, 5).data(), &[1u8, 1, 1]);
    }

    #[test]
    fn ut_xdp_action_values() {
        assert_eq!(XdpAction::Pass as u32, 2);
        assert_eq!(XdpAction::Aborted as u32, 0);
    }
}
