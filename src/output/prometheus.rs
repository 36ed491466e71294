//! Prometheus text exposition of a snapshot.
//!
//! Per-name exec statistics become `execve_total_calls` and
//! `execve_instances`, one sample per process name. `execve_all_calls_total`
//! is advanced by the growth of the summed exec count since the previous
//! render, so it survives a table reset without going backwards.

use std::io::Write;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::EvtallyError;
use crate::model::Snapshot;

/// Owns a registry with the exec and traffic metrics, updated from each
/// rendered snapshot.
pub struct MetricsExporter {
    registry: Registry,
    total_calls: IntCounterVec,
    instances: IntGaugeVec,
    all_calls: IntCounter,
    traffic_packets: IntCounter,
    traffic_bytes: IntCounter,
    last_total: u64,
}

impl MetricsExporter {
    pub fn new() -> Result<Self, EvtallyError> {
        let registry = Registry::new();

        let total_calls = IntCounterVec::new(
            Opts::new(
                "execve_total_calls",
                "Total number of execve calls by process name",
            ),
            &["process_name"],
        )?;
        let instances = IntGaugeVec::new(
            Opts::new(
                "execve_instances",
                "Number of process instances by process name",
            ),
            &["process_name"],
        )?;
        let all_calls = IntCounter::new(
            "execve_all_calls_total",
            "Total number of execve calls across all processes",
        )?;
        let traffic_packets = IntCounter::new(
            "traffic_packets_total",
            "Packets seen by the traffic monitor",
        )?;
        let traffic_bytes =
            IntCounter::new("traffic_bytes_total", "Bytes seen by the traffic monitor")?;

        registry.register(Box::new(total_calls.clone()))?;
        registry.register(Box::new(instances.clone()))?;
        registry.register(Box::new(all_calls.clone()))?;
        registry.register(Box::new(traffic_packets.clone()))?;
        registry.register(Box::new(traffic_bytes.clone()))?;

        Ok(Self {
            registry,
            total_calls,
            instances,
            all_calls,
            traffic_packets,
            traffic_bytes,
            last_total: 0,
        })
    }

    /// Value of `execve_all_calls_total` after the last update.
    pub fn all_calls_total(&self) -> u64 {
        self.all_calls.get()
    }

    /// Load `snapshot` into the registry.
    pub fn update(&mut self, snapshot: &Snapshot) {
        self.total_calls.reset();
        self.instances.reset();
        for stat in &snapshot.process_stats {
            self.total_calls
                .with_label_values(&[stat.name.as_str()])
                .inc_by(stat.total_count);
            self.instances
                .with_label_values(&[stat.name.as_str()])
                .set(i64::try_from(stat.executions).unwrap_or(i64::MAX));
        }

        let current: u64 = snapshot.process_stats.iter().map(|p| p.total_count).sum();
        if current > self.last_total {
            self.all_calls.inc_by(current - self.last_total);
        }
        self.last_total = current;

        advance_to(&self.traffic_packets, snapshot.traffic.packets);
        advance_to(&self.traffic_bytes, snapshot.traffic.bytes);
    }

    /// Update from `snapshot`, then write the whole registry.
    pub fn write(
        &mut self,
        snapshot: &Snapshot,
        writer: &mut impl Write,
    ) -> Result<(), EvtallyError> {
        self.update(snapshot);
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        writer.write_all(&buf).map_err(EvtallyError::Serialization)
    }
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("all_calls_total", &self.all_calls.get())
            .field("last_total", &self.last_total)
            .finish()
    }
}

/// Move a counter up to `value`; a lower value leaves it where it is.
fn advance_to(counter: &IntCounter, value: u64) {
    let current = counter.get();
    if value > current {
        counter.inc_by(value - current);
    }
}
