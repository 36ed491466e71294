//! evtally kernel program: exec counters (kprobe) and packet counters (XDP).
//!
//! The handlers here are the in-kernel twins of `evtally::probe`. They share
//! map layouts and constants with userspace through `evtally-common`.
//!
//! Every handler is fire-and-forget: map errors are swallowed and the
//! kprobes always return 0, the XDP programs always return `XDP_PASS`.
//!
//! Build requirements:
//! - Rust nightly toolchain
//! - Target: bpfel-unknown-none (little-endian eBPF)
//! - Build command: cargo +nightly build -Z build-std=core
//!     --target bpfel-unknown-none --release
//!
//! This crate is NOT compiled by the standard `cargo build`. It requires
//! a separate cross-compilation step as documented above.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU64, Ordering};

use aya_ebpf::bindings::{xdp_action, BPF_NOEXIST};
use aya_ebpf::helpers::{bpf_get_current_comm, bpf_get_current_pid_tgid};
use aya_ebpf::macros::{kprobe, map, xdp};
use aya_ebpf::maps::{Array, HashMap, PerCpuArray};
use aya_ebpf::programs::{ProbeContext, XdpContext};
use aya_ebpf::bpf_printk;

use evtally_common::{
    CommKey, ProcInfo, EXEC_COMM_MAP_MAX_ENTRIES, EXEC_PID_MAP_MAX_ENTRIES, PACKET_LOG_INTERVAL,
    PROC_INFO_MAP_MAX_ENTRIES, TRAFFIC_REPORT_THRESHOLD, TRAFFIC_SLOT_BYTES, TRAFFIC_SLOT_COUNT,
    TRAFFIC_SLOT_PACKETS,
};

// ---------------------------------------------------------------------------
// Maps
// ---------------------------------------------------------------------------

/// tgid → exec count.
#[map]
static EXEC_BY_PID: HashMap<u32, u64> = HashMap::with_max_entries(EXEC_PID_MAP_MAX_ENTRIES, 0);

/// Process name → exec count.
#[map]
static EXEC_BY_COMM: HashMap<CommKey, u64> =
    HashMap::with_max_entries(EXEC_COMM_MAP_MAX_ENTRIES, 0);

/// tgid → {comm, pid, count}.
#[map]
static PROC_INFO: HashMap<u32, ProcInfo> = HashMap::with_max_entries(PROC_INFO_MAP_MAX_ENTRIES, 0);

/// Slot 0 = packets, slot 1 = bytes.
#[map]
static TRAFFIC_STATS: Array<u64> = Array::with_max_entries(TRAFFIC_SLOT_COUNT, 0);

/// Per-CPU packets since the last traffic report.
#[map]
static OUTPUT_COUNTER: PerCpuArray<u32> = PerCpuArray::with_max_entries(1, 0);

#[map]
static PACKET_COUNTER: Array<u64> = Array::with_max_entries(1, 0);

// ---------------------------------------------------------------------------
// Exec kprobes
// ---------------------------------------------------------------------------

#[kprobe]
pub fn exec_by_pid(_ctx: ProbeContext) -> u32 {
    let _ = count_exec(&EXEC_BY_PID, &current_tgid());
    0
}

#[kprobe]
pub fn exec_by_comm(_ctx: ProbeContext) -> u32 {
    if let Ok(comm) = bpf_get_current_comm() {
        let _ = count_exec(&EXEC_BY_COMM, &CommKey::from_comm(&comm));
    }
    0
}

#[kprobe]
pub fn proc_info(_ctx: ProbeContext) -> u32 {
    let _ = try_proc_info(current_tgid());
    0
}

fn try_proc_info(tgid: u32) -> Result<(), i64> {
    if bump_proc_info(tgid) {
        return Ok(());
    }
    let info = ProcInfo {
        comm: bpf_get_current_comm()?,
        pid: tgid,
        _pad: 0,
        count: 1,
    };
    match PROC_INFO.insert(&tgid, &info, BPF_NOEXIST as u64) {
        // Another CPU created the entry since the miss.
        Err(_) if bump_proc_info(tgid) => Ok(()),
        r => r,
    }
}

#[inline(always)]
fn bump_proc_info(tgid: u32) -> bool {
    match PROC_INFO.get_ptr_mut(&tgid) {
        Some(info) => {
            // SAFETY: the pointer comes from a successful map lookup and stays
            // valid for the rest of this program run.
            unsafe { AtomicU64::from_ptr(&raw mut (*info).count) }
                .fetch_add(1, Ordering::Relaxed);
            true
        }
        None => false,
    }
}

/// Atomic increment, or insert `1` if absent. A CPU that loses the insert
/// race adds to the winner's entry.
#[inline(always)]
fn count_exec<K>(map: &HashMap<K, u64>, key: &K) -> Result<(), i64> {
    if bump(map, key) {
        return Ok(());
    }
    match map.insert(key, &1u64, BPF_NOEXIST as u64) {
        Err(_) if bump(map, key) => Ok(()),
        r => r,
    }
}

#[inline(always)]
fn bump<K>(map: &HashMap<K, u64>, key: &K) -> bool {
    match map.get_ptr_mut(key) {
        Some(count) => {
            // SAFETY: valid map value pointer, see `bump_proc_info`.
            unsafe { AtomicU64::from_ptr(count) }.fetch_add(1, Ordering::Relaxed);
            true
        }
        None => false,
    }
}

#[inline(always)]
fn current_tgid() -> u32 {
    (bpf_get_current_pid_tgid() >> 32) as u32
}

// ---------------------------------------------------------------------------
// XDP programs
// ---------------------------------------------------------------------------

#[xdp]
pub fn traffic_monitor(ctx: XdpContext) -> u32 {
    let size = ctx.data_end().saturating_sub(ctx.data()) as u64;

    slot_add(TRAFFIC_SLOT_BYTES, size);
    slot_add(TRAFFIC_SLOT_PACKETS, 1);

    if let Some(counter) = OUTPUT_COUNTER.get_ptr_mut(0) {
        // SAFETY: per-CPU value, only this CPU touches it.
        unsafe {
            *counter += 1;
            if *counter >= TRAFFIC_REPORT_THRESHOLD {
                let packets = slot_read(TRAFFIC_SLOT_PACKETS);
                let bytes = slot_read(TRAFFIC_SLOT_BYTES);
                bpf_printk!(b"Traffic stats: %llu packets, %llu bytes", packets, bytes);
                *counter = 0;
            }
        }
    }
    xdp_action::XDP_PASS
}

#[inline(always)]
fn slot_add(index: u32, delta: u64) {
    if let Some(slot) = TRAFFIC_STATS.get_ptr_mut(index) {
        // SAFETY: array values live as long as the map.
        unsafe { AtomicU64::from_ptr(slot) }.fetch_add(delta, Ordering::Relaxed);
    }
}

/// Current value of a traffic slot, 0 if the slot is missing.
#[inline(always)]
fn slot_read(index: u32) -> u64 {
    match TRAFFIC_STATS.get_ptr_mut(index) {
        // SAFETY: array values live as long as the map.
        Some(slot) => unsafe { AtomicU64::from_ptr(slot) }.load(Ordering::Relaxed),
        None => 0,
    }
}

#[xdp]
pub fn packet_counter(ctx: XdpContext) -> u32 {
    let size = ctx.data_end().saturating_sub(ctx.data()) as u64;
    if let Some(slot) = PACKET_COUNTER.get_ptr_mut(0) {
        // SAFETY: array values live as long as the map.
        let n = unsafe { AtomicU64::from_ptr(slot) }
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1);
        if n % PACKET_LOG_INTERVAL == 0 {
            unsafe { bpf_printk!(b"XDP: Processed packet #%llu, Size: %llu bytes", n, size) };
        }
    }
    xdp_action::XDP_PASS
}

#[no_mangle]
#[link_section = "license"]
pub static LICENSE: [u8; 4] = *b"GPL\0";

// Required by aya-ebpf for panic handling in no_std
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
