//! Live view of a running simulation: prints each newly published snapshot.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, select};

use crate::error::EvtallyError;
use crate::model::Snapshot;
use crate::output::SnapshotWriter;
use crate::state::SharedState;

/// On every tick, write the published snapshot if it changed since the last
/// write. Frames are separated by a blank line. Returns the number of frames
/// once `done` or the ticker disconnects.
pub fn watch_loop(
    shared: &SharedState,
    writer: &mut SnapshotWriter,
    ticker: Receiver<Instant>,
    done: Receiver<()>,
    out: &mut impl Write,
) -> Result<u64, EvtallyError> {
    // The snapshot present at start is never printed.
    let mut last: Arc<Snapshot> = shared.load_full();
    let mut frames = 0u64;

    loop {
        select! {
            recv(ticker) -> msg => {
                if msg.is_err() {
                    return Ok(frames);
                }
                let current = shared.load_full();
                if Arc::ptr_eq(&current, &last) {
                    continue;
                }
                writer.write(&current, out)?;
                writeln!(out).map_err(EvtallyError::Serialization)?;
                out.flush().map_err(EvtallyError::Serialization)?;
                frames += 1;
                last = current;
            }
            recv(done) -> _ => return Ok(frames),
        }
    }
}
