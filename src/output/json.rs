use std::io::Write;

use crate::error::EvtallyError;
use crate::model::Snapshot;

/// Write the snapshot as pretty-printed JSON.
pub fn write_json(snapshot: &Snapshot, writer: &mut impl Write) -> Result<(), EvtallyError> {
    serde_json::to_writer_pretty(&mut *writer, snapshot)
        .map_err(|e| EvtallyError::Serialization(std::io::Error::other(e.to_string())))?;
    writeln!(writer).map_err(EvtallyError::Serialization)
}
