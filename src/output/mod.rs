pub mod json;
pub mod pretty;
pub mod prometheus;
pub mod tsv;

use std::io::Write;

use crate::cli::OutputFormat;
use crate::error::EvtallyError;
use crate::model::Snapshot;

pub use prometheus::MetricsExporter;

/// Writes successive snapshots in one format. Keeps the Prometheus registry
/// across writes.
#[derive(Debug)]
pub struct SnapshotWriter {
    format: OutputFormat,
    metrics: Option<MetricsExporter>,
}

impl SnapshotWriter {
    pub fn new(format: OutputFormat) -> Result<Self, EvtallyError> {
        let metrics = match format {
            OutputFormat::Prometheus => Some(MetricsExporter::new()?),
            _ => None,
        };
        Ok(Self { format, metrics })
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn write(
        &mut self,
        snapshot: &Snapshot,
        writer: &mut impl Write,
    ) -> Result<(), EvtallyError> {
        match self.format {
            OutputFormat::Tsv => tsv::write_tsv(snapshot, writer),
            OutputFormat::Json => json::write_json(snapshot, writer),
            OutputFormat::Pretty => pretty::write_pretty(snapshot, writer),
            OutputFormat::Prometheus => match self.metrics.as_mut() {
                Some(metrics) => metrics.write(snapshot, writer),
                None => Err(EvtallyError::Fatal("metrics registry missing".to_string())),
            },
        }
    }
}

/// Write a counter snapshot in the specified format.
pub fn write_snapshot(
    snapshot: &Snapshot,
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<(), EvtallyError> {
    SnapshotWriter::new(format)?.write(snapshot, writer)
}
