//! Process-creation counters.

use evtally_common::{CommKey, ExecEvent, ProcInfo, TASK_COMM_LEN};

use crate::error::EvtallyError;
use crate::probe::{ExecProbe, note};
use crate::protocol::record;
use crate::table::CounterTable;

/// Exec count per process id.
#[derive(Debug)]
pub struct ExecCountByPid {
    table: CounterTable<u32>,
}

impl ExecCountByPid {
    pub fn new(capacity: usize) -> Result<Self, EvtallyError> {
        Ok(Self {
            table: CounterTable::with_capacity(capacity)?,
        })
    }

    pub fn table(&self) -> &CounterTable<u32> {
        &self.table
    }
}

impl ExecProbe for ExecCountByPid {
    fn on_exec(&self, ev: &ExecEvent) {
        note("exec_by_pid", record(&self.table, ev.tgid, || ()));
    }
}

/// Exec count per command name (truncated, zero-padded to `COMM_KEY_LEN`).
#[derive(Debug)]
pub struct ExecCountByComm {
    table: CounterTable<CommKey>,
}

impl ExecCountByComm {
    pub fn new(capacity: usize) -> Result<Self, EvtallyError> {
        Ok(Self {
            table: CounterTable::with_capacity(capacity)?,
        })
    }

    pub fn table(&self) -> &CounterTable<CommKey> {
        &self.table
    }
}

impl ExecProbe for ExecCountByComm {
    fn on_exec(&self, ev: &ExecEvent) {
        note(
            "exec_by_comm",
            record(&self.table, CommKey::from_comm(&ev.comm), || ()),
        );
    }
}

/// Identity captured from the event that created a `ExecInfoByPid` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcIdentity {
    pub comm: [u8; TASK_COMM_LEN],
    pub pid: u32,
}

/// Exec count per process id, with the name seen on the first exec.
#[derive(Debug)]
pub struct ExecInfoByPid {
    table: CounterTable<u32, ProcIdentity>,
}

impl ExecInfoByPid {
    pub fn new(capacity: usize) -> Result<Self, EvtallyError> {
        Ok(Self {
            table: CounterTable::with_capacity(capacity)?,
        })
    }

    pub fn table(&self) -> &CounterTable<u32, ProcIdentity> {
        &self.table
    }

    /// Entries in the shared `ProcInfo` layout.
    pub fn records(&self) -> Vec<ProcInfo> {
        self.table
            .iter()
            .map(|(_, entry)| ProcInfo {
                comm: entry.aux.comm,
                pid: entry.aux.pid,
                _pad: 0,
                count: entry.count,
            })
            .collect()
    }
}

impl ExecProbe for ExecInfoByPid {
    fn on_exec(&self, ev: &ExecEvent) {
        let update = record(&self.table, ev.tgid, || ProcIdentity {
            comm: ev.comm,
            pid: ev.tgid,
        });
        note("proc_info", update);
    }
}
