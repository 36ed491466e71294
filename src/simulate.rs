//! Synthetic event stream and the threads that drive a session with it.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, bounded, select, tick};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use evtally_common::ExecEvent;

use crate::cli::SimulationOptions;
use crate::error::EvtallyError;
use crate::model::Snapshot;
use crate::probe::PacketEvent;
use crate::session::Session;
use crate::state::{self, SharedState};

/// Largest synthetic frame, Ethernet MTU plus header.
pub const MAX_FRAME_LEN: usize = 1514;
const MIN_FRAME_LEN: usize = 60;

/// One event in ten is a process creation, the rest are packets.
const EXEC_RATIO: (u32, u32) = (1, 10);

/// Workers check their stop flags this often.
const SHUTDOWN_CHECK_EVERY: u64 = 1024;

const COMMANDS: &[&str] = &[
    "bash", "sh", "curl", "python3", "git", "make", "cc", "ls", "cat", "sshd", "cron",
    "containerd-shim-runc",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticEvent {
    Exec(ExecEvent),
    Packet { len: usize },
}

/// Deterministic per-worker event generator.
///
/// The same seed and worker id always yield the same sequence. A pid keeps
/// its command name for the whole run.
pub struct Workload {
    rng: ChaCha8Rng,
    pid_range: u32,
}

impl Workload {
    pub fn new(seed: u64, worker: usize, pid_range: u32) -> Self {
        let stream = seed ^ (worker as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Self {
            rng: ChaCha8Rng::seed_from_u64(stream),
            pid_range: pid_range.max(1),
        }
    }

    pub fn next_event(&mut self) -> SyntheticEvent {
        if self.rng.gen_ratio(EXEC_RATIO.0, EXEC_RATIO.1) {
            let tgid = self.rng.gen_range(1..=self.pid_range);
            let tid = tgid.saturating_add(self.rng.gen_range(0..4));
            let name = COMMANDS[tgid as usize % COMMANDS.len()];
            SyntheticEvent::Exec(ExecEvent::new(tid, tgid, name.as_bytes()))
        } else {
            SyntheticEvent::Packet {
                len: self.rng.gen_range(MIN_FRAME_LEN..=MAX_FRAME_LEN),
            }
        }
    }
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct SimulationSummary {
    pub snapshot: Snapshot,
    pub events: u64,
    pub report_lines: u64,
}

/// Run `opts.workers` contexts over the synthetic stream until every worker
/// has produced `opts.events_per_worker` events or `shutdown` is set.
///
/// Report lines are written to `trace_out` by a dedicated drain thread. A
/// snapshot is published to `shared` on every poll tick and once at the end.
pub fn run_simulation<W>(
    opts: &SimulationOptions,
    shutdown: &'static AtomicBool,
    trace_out: W,
    shared: &SharedState,
) -> Result<SimulationSummary, EvtallyError>
where
    W: Write + Send + 'static,
{
    let (session, trace_rx) = Session::new(opts)?;
    let session = Arc::new(session);
    let stop = Arc::new(AtomicBool::new(false));
    let started = Instant::now();

    let drain = thread::Builder::new()
        .name("evtally-trace".into())
        .spawn(move || drain_trace(trace_rx, trace_out))
        .map_err(|e| EvtallyError::Fatal(format!("spawn trace thread: {e}")))?;

    let mut workers = Vec::with_capacity(opts.workers);
    for id in 0..opts.workers {
        let session = Arc::clone(&session);
        let stop_flag = Arc::clone(&stop);
        let mut workload = Workload::new(opts.seed, id, opts.pid_range);
        let events = opts.events_per_worker;
        let spawned = thread::Builder::new()
            .name(format!("evtally-worker-{id}"))
            .spawn(move || {
                worker_loop(&session, id, &mut workload, events, &[shutdown, &*stop_flag])
            });
        match spawned {
            Ok(h) => workers.push(h),
            Err(e) => {
                halt_workers(&stop, workers);
                return Err(EvtallyError::Fatal(format!("spawn worker thread: {e}")));
            }
        }
    }
    log::info!("Started {} worker(s), {} events each", opts.workers, opts.events_per_worker);

    let (done_tx, done_rx) = bounded::<()>(0);
    let poller = {
        let session = Arc::clone(&session);
        let shared = Arc::clone(shared);
        let interval = opts.poll_interval;
        let spawned = thread::Builder::new()
            .name("evtally-poll".into())
            .spawn(move || poll_loop(&session, &shared, tick(interval), done_rx));
        match spawned {
            Ok(h) => h,
            Err(e) => {
                halt_workers(&stop, workers);
                return Err(EvtallyError::Fatal(format!("spawn poll thread: {e}")));
            }
        }
    };

    let mut events = 0u64;
    let mut failure = None;
    for h in workers {
        match h.join() {
            Ok(n) => events += n,
            Err(_) => {
                log::warn!("worker thread panicked");
                failure = Some(EvtallyError::Thread("worker thread panicked".to_string()));
            }
        }
    }

    drop(done_tx);
    if poller.join().is_err() {
        log::warn!("poll thread panicked");
    }

    let snapshot = session.snapshot();
    state::publish(shared, snapshot.clone());

    // Last sender goes with the session; the drain thread then finishes.
    drop(session);
    let report_lines = match drain.join() {
        Ok(n) => n,
        Err(_) => {
            log::warn!("trace thread panicked");
            0
        }
    };

    if let Some(e) = failure {
        return Err(e);
    }

    log::info!(
        "Processed {} events in {:.2}s: {} packets, {} bytes, {} report line(s)",
        events,
        started.elapsed().as_secs_f64(),
        snapshot.traffic.packets,
        snapshot.traffic.bytes,
        report_lines
    );
    if snapshot.dropped.trace_lines > 0 {
        log::warn!(
            "{} report line(s) dropped, trace buffer full",
            snapshot.dropped.trace_lines
        );
    }

    Ok(SimulationSummary {
        snapshot,
        events,
        report_lines,
    })
}

/// Stop every started worker and wait for it, for a run aborted before all
/// its threads were up.
fn halt_workers(stop: &AtomicBool, workers: Vec<JoinHandle<u64>>) {
    stop.store(true, Ordering::Relaxed);
    for h in workers {
        if h.join().is_err() {
            log::warn!("worker thread panicked");
        }
    }
}

/// `stop` holds flags that each end the loop early when set.
fn worker_loop(
    session: &Session,
    id: usize,
    workload: &mut Workload,
    events: u64,
    stop: &[&AtomicBool],
) -> u64 {
    let frame = [0u8; MAX_FRAME_LEN];
    let mut ctx = session.worker_context(id);
    let mut done = 0u64;

    while done < events {
        if done % SHUTDOWN_CHECK_EVERY == 0 && stop.iter().any(|f| f.load(Ordering::Relaxed)) {
            log::info!("worker {id}: stop requested after {done} events");
            break;
        }
        match workload.next_event() {
            SyntheticEvent::Exec(ev) => session.dispatch_exec(&ev),
            SyntheticEvent::Packet { len } => {
                session.dispatch_packet(&mut ctx, &PacketEvent::new(&frame, 0, len));
            }
        }
        done += 1;
    }

    log::debug!("worker {id}: finished, {done} events");
    done
}

fn poll_loop(
    session: &Session,
    shared: &SharedState,
    ticker: Receiver<Instant>,
    done: Receiver<()>,
) {
    loop {
        select! {
            recv(ticker) -> _ => {
                let snapshot = session.snapshot();
                log::debug!(
                    "poll: {} pids, {} names, {} packets, {} bytes",
                    snapshot.exec_by_pid.len(),
                    snapshot.exec_by_comm.len(),
                    snapshot.traffic.packets,
                    snapshot.traffic.bytes
                );
                state::publish(shared, snapshot);
            }
            recv(done) -> _ => return,
        }
    }
}

fn drain_trace(rx: Receiver<String>, mut out: impl Write) -> u64 {
    let mut lines = 0u64;
    for line in rx.iter() {
        lines += 1;
        if let Err(e) = writeln!(out, "{line}") {
            log::warn!("trace output: {e}");
        }
    }
    let _ = out.flush();
    lines
}
