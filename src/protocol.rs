//! Per-event update protocol: lookup, then increment or initialise.
//!
//! `record` fuses the lookup with a hardware atomic add. On a miss it goes
//! through `insert_or_add`, so a context that misses and then finds the key
//! created by someone else still adds instead of overwriting. A key's count
//! never goes backwards; the only events lost are those dropped with an
//! `UpdateError`.

use std::hash::Hash;

use crate::error::UpdateError;
use crate::table::{CounterTable, Entry, Inserted, Upserted};

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// Existing entry, new count.
    Incremented(u64),
    /// First event for this key.
    Created,
    /// `record_copy` only: another context created the key between the
    /// lookup and the upsert, and its count was overwritten.
    Overwritten,
    /// Event not counted.
    Dropped(UpdateError),
}

impl Update {
    /// Whether the event left a trace in the table.
    pub fn is_recorded(&self) -> bool {
        !matches!(self, Update::Dropped(_))
    }
}

/// Count one event for `key`. `aux` is only evaluated when the entry is created.
pub fn record<K, A>(table: &CounterTable<K, A>, key: K, aux: impl FnOnce() -> A) -> Update
where
    K: Copy + Eq + Hash,
    A: Copy,
{
    if let Some(count) = table.fetch_add(&key, 1) {
        return Update::Incremented(count);
    }

    match table.insert_or_add(key, Entry { count: 1, aux: aux() }) {
        Ok(Inserted::Created) => Update::Created,
        Ok(Inserted::Added(count)) => Update::Incremented(count),
        Err(e) => Update::Dropped(e),
    }
}

/// Copy-then-upsert variant: read the entry, add one to the copy, write it back.
///
/// Exact when callers are sequential. Under concurrency it loses increments on
/// existing entries as well as on first touch, because the read-modify-write
/// is not atomic. Prefer `record`.
pub fn record_copy<K, A>(table: &CounterTable<K, A>, key: K, aux: impl FnOnce() -> A) -> Update
where
    K: Copy + Eq + Hash,
    A: Copy,
{
    let existing = table.lookup(&key);
    let entry = match existing {
        Some(e) => Entry {
            count: e.count.wrapping_add(1),
            aux: e.aux,
        },
        None => Entry { count: 1, aux: aux() },
    };

    match (table.upsert(key, entry), existing) {
        (Ok(Upserted::Overwritten), Some(_)) => Update::Incremented(entry.count),
        (Ok(Upserted::Overwritten), None) => Update::Overwritten,
        (Ok(Upserted::Created), _) => Update::Created,
        (Err(e), _) => Update::Dropped(e),
    }
}
