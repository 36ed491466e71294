use std::io::Write;

use crate::error::EvtallyError;
use crate::model::{ProcessStat, Snapshot};

/// Pids listed per name before the list is elided.
const PID_DISPLAY_LIMIT: usize = 5;

/// Write the snapshot as human-readable tables.
///
/// Per-name process statistics come first (busiest name first), followed by
/// the traffic totals and, when anything was lost, the drop counters.
pub fn write_pretty(snapshot: &Snapshot, writer: &mut impl Write) -> Result<(), EvtallyError> {
    write_pretty_inner(snapshot, writer).map_err(EvtallyError::Serialization)
}

fn write_pretty_inner(s: &Snapshot, w: &mut impl Write) -> Result<(), std::io::Error> {
    writeln!(w, "Process Exec Statistics")?;
    writeln!(w, "{}", "=".repeat(78))?;
    writeln!(
        w,
        "{:<20} {:>12} {:>12}  {}",
        "PROCESS", "TOTAL", "EXECUTIONS", "PIDS"
    )?;
    writeln!(w, "{}", "-".repeat(78))?;

    for stat in &s.process_stats {
        writeln!(
            w,
            "{:<20} {:>12} {:>12}  {}",
            truncate(&stat.name, 20),
            stat.total_count,
            stat.executions,
            format_pids(stat),
        )?;
    }

    if s.process_stats.is_empty() {
        writeln!(w, "(no exec events recorded)")?;
    }

    writeln!(w, "{}", "-".repeat(78))?;
    let total: u64 = s.process_stats.iter().map(|p| p.total_count).sum();
    writeln!(
        w,
        "Total unique processes: {}, Total calls: {}",
        s.process_stats.len(),
        total
    )?;

    writeln!(w)?;
    writeln!(
        w,
        "Traffic: {} packets, {}",
        s.traffic.packets,
        format_bytes(s.traffic.bytes)
    )?;
    writeln!(w, "Packet counter: {}", s.packet_counter)?;

    let d = &s.dropped;
    if d.exec_by_pid + d.exec_by_comm + d.proc_info + d.trace_lines > 0 {
        writeln!(
            w,
            "Dropped: exec_by_pid={} exec_by_comm={} proc_info={} trace_lines={}",
            d.exec_by_pid, d.exec_by_comm, d.proc_info, d.trace_lines
        )?;
    }

    Ok(())
}

/// Up to five pids, then `etc. (<n> total)`.
fn format_pids(stat: &ProcessStat) -> String {
    let shown: Vec<String> = stat
        .pids
        .iter()
        .take(PID_DISPLAY_LIMIT)
        .map(|p| p.to_string())
        .collect();
    let mut out = shown.join(", ");
    if stat.pids.len() > PID_DISPLAY_LIMIT {
        out.push_str(&format!(" etc. ({} total)", stat.pids.len()));
    }
    out
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GiB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MiB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max - 3).collect();
        format!("{head}...")
    }
}
