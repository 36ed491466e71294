//! Shared data structures between the eBPF kernel program and userspace.
//!
//! These types must be `#[repr(C)]` so both sides agree on the exact
//! byte layout of map keys and values.

#![cfg_attr(not(test), no_std)]

/// Length of the kernel's `task_struct::comm` buffer.
pub const TASK_COMM_LEN: usize = 16;

/// Width of the process-name key used by the per-name exec counter.
///
/// Wider than `TASK_COMM_LEN`; the tail is always zero-padded.
pub const COMM_KEY_LEN: usize = 32;

/// Capacity of the pid → exec count map.
pub const EXEC_PID_MAP_MAX_ENTRIES: u32 = 8192;

/// Capacity of the process name → exec count map.
pub const EXEC_COMM_MAP_MAX_ENTRIES: u32 = 1024;

/// Capacity of the pid → `ProcInfo` map.
pub const PROC_INFO_MAP_MAX_ENTRIES: u32 = 8192;

/// Aggregate slot indices of the traffic monitor array.
pub const TRAFFIC_SLOT_PACKETS: u32 = 0;
pub const TRAFFIC_SLOT_BYTES: u32 = 1;
pub const TRAFFIC_SLOT_COUNT: u32 = 2;

/// Packets processed by one CPU between two traffic reports.
pub const TRAFFIC_REPORT_THRESHOLD: u32 = 10_000;

/// The packet counter logs every Nth packet (global count).
pub const PACKET_LOG_INTERVAL: u64 = 100;

/// Process-creation event as seen by the exec handlers.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecEvent {
    /// Thread id (low half of `bpf_get_current_pid_tgid`).
    pub pid: u32,
    /// Process id (high half of `bpf_get_current_pid_tgid`).
    pub tgid: u32,
    /// NUL-padded command name.
    pub comm: [u8; TASK_COMM_LEN],
}

impl ExecEvent {
    /// Build an event, truncating `name` to `TASK_COMM_LEN - 1` bytes like the kernel does.
    pub fn new(pid: u32, tgid: u32, name: &[u8]) -> Self {
        let mut comm = [0u8; TASK_COMM_LEN];
        let n = name.len().min(TASK_COMM_LEN - 1);
        comm[..n].copy_from_slice(&name[..n]);
        Self { pid, tgid, comm }
    }
}

/// Process-name key, zero-padded to `COMM_KEY_LEN`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CommKey {
    pub name: [u8; COMM_KEY_LEN],
}

impl CommKey {
    pub fn from_comm(comm: &[u8]) -> Self {
        let mut name = [0u8; COMM_KEY_LEN];
        let n = comm.len().min(COMM_KEY_LEN);
        name[..n].copy_from_slice(&comm[..n]);
        Self { name }
    }
}

/// Value of the pid → process info map.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcInfo {
    pub comm: [u8; TASK_COMM_LEN],
    pub pid: u32,
    /// Padding for alignment of `count`.
    pub _pad: u32,
    pub count: u64,
}

/// Return the bytes of a NUL-padded name up to the first NUL.
pub fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

// Compile-time size assertions to catch layout mismatches early.
const _: () = assert!(core::mem::size_of::<ExecEvent>() == 24);
const _: () = assert!(core::mem::size_of::<CommKey>() == 32);
const _: () = assert!(core::mem::size_of::<ProcInfo>() == 32);

#[cfg(feature = "user")]
unsafe impl aya::Pod for ExecEvent {}

#[cfg(feature = "user")]
unsafe impl aya::Pod for CommKey {}

#[cfg(feature = "user")]
unsafe impl aya::Pod for ProcInfo {}
