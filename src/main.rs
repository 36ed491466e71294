use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use clap::{CommandFactory, Parser};
use crossbeam_channel::{Sender, bounded, tick};

use evtally::cli::{Cli, SimulationOptions};
use evtally::error::EvtallyError;
use evtally::output::SnapshotWriter;
use evtally::simulate;
use evtally::state::{self, SharedState};
use evtally::watch;

/// Global shutdown flag, set by signal handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(
            libc::SIGTERM,
            signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGINT,
            signal_handler as *const () as libc::sighandler_t,
        );
    }
}

fn exit_code(err: &EvtallyError) -> i32 {
    match err {
        EvtallyError::InvalidConfig(_) => 2,
        EvtallyError::Serialization(_) | EvtallyError::Metrics(_) => 3,
        EvtallyError::Thread(_) | EvtallyError::Fatal(_) => 4,
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(cli)));

    match result {
        Ok(Ok(())) => std::process::exit(0),
        Ok(Err(e)) => {
            eprintln!("error: {e}");
            std::process::exit(exit_code(&e));
        }
        Err(_) => {
            eprintln!("error: fatal: unexpected panic");
            std::process::exit(4);
        }
    }
}

fn run(cli: Cli) -> Result<(), EvtallyError> {
    let Some(opts) = cli.resolve() else {
        return Cli::command()
            .print_help()
            .map_err(EvtallyError::Serialization);
    };

    install_signal_handlers();

    let shared = state::new_shared_state();
    let mut writer = SnapshotWriter::new(opts.format)?;
    let watcher = if opts.watch {
        Some(spawn_watcher(&opts, &shared)?)
    } else {
        None
    };

    let result = simulate::run_simulation(&opts, &SHUTDOWN_REQUESTED, io::stderr(), &shared);

    // The watcher hands its writer back so the metric totals carry over.
    if let Some(taken) = watcher.and_then(finish_watcher) {
        writer = taken;
    }

    let summary = result?;
    if SHUTDOWN_REQUESTED.load(Ordering::Relaxed) {
        log::info!("Interrupted, printing partial counters");
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writer.write(&summary.snapshot, &mut out)
}

type WatchHandle = JoinHandle<(SnapshotWriter, Result<u64, EvtallyError>)>;

/// Print every polled snapshot on stdout until the returned sender is dropped.
fn spawn_watcher(
    opts: &SimulationOptions,
    shared: &SharedState,
) -> Result<(Sender<()>, WatchHandle), EvtallyError> {
    let mut writer = SnapshotWriter::new(opts.format)?;
    let (done_tx, done_rx) = bounded::<()>(0);
    let shared = Arc::clone(shared);
    let ticker = tick(opts.poll_interval);
    let handle = thread::Builder::new()
        .name("evtally-watch".into())
        .spawn(move || {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let result = watch::watch_loop(&shared, &mut writer, ticker, done_rx, &mut out);
            (writer, result)
        })
        .map_err(|e| EvtallyError::Fatal(format!("spawn watch thread: {e}")))?;
    Ok((done_tx, handle))
}

/// Stop the watcher and take its writer back, `None` if it panicked.
fn finish_watcher((done_tx, handle): (Sender<()>, WatchHandle)) -> Option<SnapshotWriter> {
    drop(done_tx);
    match handle.join() {
        Ok((writer, Ok(frames))) => {
            log::debug!("watch: {frames} frame(s) written");
            Some(writer)
        }
        Ok((writer, Err(e))) => {
            log::warn!("watch output: {e}");
            Some(writer)
        }
        Err(_) => {
            log::warn!("watch thread panicked");
            None
        }
    }
}
