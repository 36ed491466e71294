//! Event dispatch: one session owns every probe and the trace pipe.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use evtally_common::ExecEvent;

use crate::cli::SimulationOptions;
use crate::error::EvtallyError;
use crate::model::{
    CommCount, DropCounts, PidCount, ProcessRecord, Snapshot, TrafficTotals, aggregate_by_name,
    comm_to_string, now_millis, sort_by_count,
};
use crate::probe::{
    ExecCountByComm, ExecCountByPid, ExecInfoByPid, ExecProbe, PacketCounter, PacketEvent,
    PacketProbe, TrafficMonitor, XdpAction,
};
use crate::report::{ReportSink, TRAFFIC_LABEL, TracePipe};
use crate::sampler::SamplingCounter;

/// State private to one execution context.
#[derive(Debug)]
pub struct WorkerContext {
    pub id: usize,
    traffic: SamplingCounter,
}

impl WorkerContext {
    pub fn traffic_sampler(&self) -> &SamplingCounter {
        &self.traffic
    }
}

pub struct Session {
    exec_by_pid: ExecCountByPid,
    exec_by_comm: ExecCountByComm,
    proc_info: ExecInfoByPid,
    traffic: TrafficMonitor,
    packets: PacketCounter,
    trace: Arc<TracePipe>,
}

impl Session {
    /// Build every table and probe. Returns the read end of the trace pipe.
    pub fn new(opts: &SimulationOptions) -> Result<(Self, Receiver<String>), EvtallyError> {
        let (pipe, rx) = TracePipe::bounded(opts.trace_buffer);
        let trace = Arc::new(pipe);
        let sink: Arc<dyn ReportSink> = trace.clone();

        let session = Self {
            exec_by_pid: ExecCountByPid::new(opts.pid_capacity)?,
            exec_by_comm: ExecCountByComm::new(opts.comm_capacity)?,
            proc_info: ExecInfoByPid::new(opts.info_capacity)?,
            traffic: TrafficMonitor::new(TRAFFIC_LABEL, opts.threshold, Arc::clone(&sink))?,
            packets: PacketCounter::new(opts.log_every, sink)?,
            trace,
        };
        log::debug!(
            "session tables: pid={:?} comm={:?} info={:?}",
            session.exec_by_pid.table(),
            session.exec_by_comm.table(),
            session.proc_info.table()
        );
        Ok((session, rx))
    }

    pub fn worker_context(&self, id: usize) -> WorkerContext {
        WorkerContext {
            id,
            traffic: self.traffic.local(),
        }
    }

    /// Run every process-creation handler on one event.
    pub fn dispatch_exec(&self, ev: &ExecEvent) {
        self.exec_by_pid.on_exec(ev);
        self.exec_by_comm.on_exec(ev);
        self.proc_info.on_exec(ev);
    }

    /// Run every packet handler on one packet from the context `ctx`.
    pub fn dispatch_packet(&self, ctx: &mut WorkerContext, pkt: &PacketEvent<'_>) -> XdpAction {
        let verdict = self.traffic.on_packet(&mut ctx.traffic, pkt);
        self.packets.on_packet(&mut (), pkt);
        verdict
    }

    pub fn traffic(&self) -> &TrafficMonitor {
        &self.traffic
    }

    pub fn packet_counter(&self) -> &PacketCounter {
        &self.packets
    }

    pub fn exec_by_pid(&self) -> &ExecCountByPid {
        &self.exec_by_pid
    }

    pub fn exec_by_comm(&self) -> &ExecCountByComm {
        &self.exec_by_comm
    }

    pub fn proc_info(&self) -> &ExecInfoByPid {
        &self.proc_info
    }

    /// Enumerate every table and slot. Safe to call while handlers run.
    pub fn snapshot(&self) -> Snapshot {
        let mut exec_by_pid: Vec<PidCount> = self
            .exec_by_pid
            .table()
            .iter()
            .map(|(pid, e)| PidCount {
                pid,
                count: e.count,
            })
            .collect();
        sort_by_count(&mut exec_by_pid, |p| p.count, |p| p.pid);

        let mut exec_by_comm: Vec<CommCount> = self
            .exec_by_comm
            .table()
            .iter()
            .map(|(key, e)| CommCount {
                comm: comm_to_string(&key.name),
                count: e.count,
            })
            .collect();
        sort_by_count(&mut exec_by_comm, |c| c.count, |c| c.comm.clone());

        let mut processes: Vec<ProcessRecord> = self
            .proc_info
            .records()
            .into_iter()
            .map(|r| ProcessRecord {
                pid: r.pid,
                comm: comm_to_string(&r.comm),
                count: r.count,
            })
            .collect();
        sort_by_count(&mut processes, |r| r.count, |r| r.pid);

        Snapshot {
            timestamp: now_millis(),
            exec_by_pid,
            exec_by_comm,
            process_stats: aggregate_by_name(&processes),
            processes,
            traffic: TrafficTotals {
                packets: self.traffic.packets(),
                bytes: self.traffic.bytes(),
            },
            packet_counter: self.packets.count(),
            dropped: DropCounts {
                exec_by_pid: self.exec_by_pid.table().dropped(),
                exec_by_comm: self.exec_by_comm.table().dropped(),
                proc_info: self.proc_info.table().dropped(),
                trace_lines: self.trace.dropped(),
            },
        }
    }
}
