pub mod process;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use evtally_common::trim_nul;

pub use process::{ProcessStat, aggregate_by_name};

/// Point-in-time view of every table and slot array.
///
/// Each table is enumerated independently while writers keep running, so
/// the parts are not mutually consistent.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Snapshot {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub exec_by_pid: Vec<PidCount>,
    pub exec_by_comm: Vec<CommCount>,
    pub processes: Vec<ProcessRecord>,
    pub process_stats: Vec<ProcessStat>,
    pub traffic: TrafficTotals,
    pub packet_counter: u64,
    pub dropped: DropCounts,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn total_execs(&self) -> u64 {
        self.exec_by_pid.iter().map(|p| p.count).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PidCount {
    pub pid: u32,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommCount {
    pub comm: String,
    pub count: u64,
}

/// One entry of the pid → `{comm, pid, count}` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub comm: String,
    pub count: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrafficTotals {
    pub packets: u64,
    pub bytes: u64,
}

/// Events and report lines lost since start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DropCounts {
    pub exec_by_pid: u64,
    pub exec_by_comm: u64,
    pub proc_info: u64,
    pub trace_lines: u64,
}

/// Render a NUL-padded kernel name, replacing invalid UTF-8.
pub fn comm_to_string(comm: &[u8]) -> String {
    String::from_utf8_lossy(trim_nul(comm)).into_owned()
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Sort by count descending, then by `key` ascending for a stable order.
pub(crate) fn sort_by_count<T, K: Ord>(
    items: &mut [T],
    count: impl Fn(&T) -> u64,
    key: impl Fn(&T) -> K,
) {
    items.sort_by(|a, b| count(b).cmp(&count(a)).then_with(|| key(a).cmp(&key(b))));
}
