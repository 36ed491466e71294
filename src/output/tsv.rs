use std::io::Write;

use crate::error::EvtallyError;
use crate::model::Snapshot;

/// Write the snapshot as TSV.
///
/// Output: header row, then one row per counter. Columns are tab-separated:
/// table, pid, name, count. Columns that do not apply to a table hold `-`.
/// Rows within a table keep the snapshot order (count descending).
pub fn write_tsv(snapshot: &Snapshot, writer: &mut impl Write) -> Result<(), EvtallyError> {
    write_tsv_inner(snapshot, writer).map_err(EvtallyError::Serialization)
}

fn write_tsv_inner(s: &Snapshot, w: &mut impl Write) -> Result<(), std::io::Error> {
    writeln!(w, "table\tpid\tname\tcount")?;

    for p in &s.exec_by_pid {
        writeln!(w, "exec_by_pid\t{}\t-\t{}", p.pid, p.count)?;
    }
    for c in &s.exec_by_comm {
        writeln!(w, "exec_by_comm\t-\t{}\t{}", escape_tsv(&c.comm), c.count)?;
    }
    for r in &s.processes {
        writeln!(w, "proc_info\t{}\t{}\t{}", r.pid, escape_tsv(&r.comm), r.count)?;
    }
    writeln!(w, "traffic\t-\tpackets\t{}", s.traffic.packets)?;
    writeln!(w, "traffic\t-\tbytes\t{}", s.traffic.bytes)?;
    writeln!(w, "packet_counter\t-\tpackets\t{}", s.packet_counter)?;

    Ok(())
}

/// Escape tabs and newlines in a string for TSV output.
fn escape_tsv(s: &str) -> String {
    s.replace(['\t', '\n', '\r'], " ")
}
