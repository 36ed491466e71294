//! Fixed-capacity concurrent counter table.
//!
//! Open addressing with linear probing over an arena allocated once at
//! construction. Every slot carries a tag word:
//!
//! - `EMPTY`: never used.
//! - `fingerprint | CLAIMED`: a creator won the slot and is writing key and aux.
//! - `fingerprint | READY`: key and aux are published and immutable.
//!
//! The count lives in its own `AtomicU64`, so increments on an existing entry
//! are a single hardware fetch-and-add. `insert_or_add` keeps that guarantee
//! across creation: a context that loses the race to create a key adds its
//! count to the winner's entry instead of replacing it. `upsert` is the plain
//! map-update: it overwrites the count of an existing entry.
//!
//! Entries are never removed while the table is shared, so an `EMPTY` slot
//! always terminates a probe sequence.

use std::cell::UnsafeCell;
use std::fmt;
use std::hash::{BuildHasher, BuildHasherDefault, Hash};
use std::hint;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use rustc_hash::FxHasher;

use crate::error::{EvtallyError, UpdateError};

const EMPTY: u64 = 0;
const CLAIMED: u64 = 0b01;
const READY: u64 = 0b10;
const STATE_MASK: u64 = 0b11;

/// Spin iterations granted to an in-flight creator before the event is dropped.
pub const PUBLISH_SPIN_LIMIT: u32 = 128;

/// Snapshot of one table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry<A = ()> {
    pub count: u64,
    /// Auxiliary fields, fixed when the entry is created.
    pub aux: A,
}

impl Entry<()> {
    pub const fn with_count(count: u64) -> Self {
        Self { count, aux: () }
    }
}

/// What a successful `upsert` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upserted {
    /// The key was new and now occupies a slot.
    Created,
    /// The key already existed; its count was overwritten, aux left as is.
    Overwritten,
}

/// What a successful `insert_or_add` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Inserted {
    /// The key was new and now occupies a slot.
    Created,
    /// The key already existed; the count was added, giving this new value.
    Added(u64),
}

/// Slot found for a key by the insert path.
enum Placement<'a, K, A> {
    Created,
    Existing(&'a Slot<K, A>),
}

struct Slot<K, A> {
    tag: AtomicU64,
    count: AtomicU64,
    key: UnsafeCell<MaybeUninit<K>>,
    aux: UnsafeCell<MaybeUninit<A>>,
}

impl<K: Copy, A: Copy> Slot<K, A> {
    fn vacant() -> Self {
        Self {
            tag: AtomicU64::new(EMPTY),
            count: AtomicU64::new(0),
            key: UnsafeCell::new(MaybeUninit::uninit()),
            aux: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// # Safety
    /// The caller must have observed `READY` with acquire ordering.
    unsafe fn key(&self) -> K {
        unsafe { self.key.get().read().assume_init() }
    }

    /// # Safety
    /// The caller must have observed `READY` with acquire ordering.
    unsafe fn entry(&self) -> Entry<A> {
        Entry {
            count: self.count.load(Ordering::Relaxed),
            aux: unsafe { self.aux.get().read().assume_init() },
        }
    }

    /// # Safety
    /// The caller must own the slot through a successful `EMPTY -> CLAIMED` CAS.
    unsafe fn publish(&self, key: K, entry: Entry<A>, fingerprint: u64) {
        unsafe {
            self.key.get().write(MaybeUninit::new(key));
            self.aux.get().write(MaybeUninit::new(entry.aux));
        }
        self.count.store(entry.count, Ordering::Relaxed);
        self.tag.store(fingerprint | READY, Ordering::Release);
    }

    /// Bounded wait for a claimed slot to become `READY`.
    fn await_publish(&self) -> bool {
        for _ in 0..PUBLISH_SPIN_LIMIT {
            if self.tag.load(Ordering::Acquire) & READY != 0 {
                return true;
            }
            hint::spin_loop();
        }
        false
    }
}

/// Fixed-capacity key → `Entry<A>` table shared by every execution context.
pub struct CounterTable<K, A = ()> {
    slots: Box<[Slot<K, A>]>,
    mask: usize,
    capacity: usize,
    len: AtomicUsize,
    dropped: AtomicU64,
    hasher: BuildHasherDefault<FxHasher>,
}

// Key and aux are written once by the claiming context and published with
// release ordering; afterwards they are only read.
unsafe impl<K: Send + Sync, A: Send + Sync> Sync for CounterTable<K, A> {}

impl<K, A> CounterTable<K, A>
where
    K: Copy + Eq + Hash,
    A: Copy,
{
    /// Allocate a table holding at most `capacity` entries.
    ///
    /// The arena has twice as many slots (rounded up to a power of two) so
    /// probe sequences stay short even when the table is full.
    pub fn with_capacity(capacity: usize) -> Result<Self, EvtallyError> {
        if capacity == 0 {
            return Err(EvtallyError::InvalidConfig(
                "counter table capacity must be at least 1".to_string(),
            ));
        }
        let slot_count = capacity
            .checked_mul(2)
            .and_then(usize::checked_next_power_of_two)
            .ok_or_else(|| {
                EvtallyError::InvalidConfig(format!("counter table capacity {capacity} too large"))
            })?;
        let slots = (0..slot_count).map(|_| Slot::vacant()).collect();

        Ok(Self {
            slots,
            mask: slot_count - 1,
            capacity,
            len: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            hasher: BuildHasherDefault::default(),
        })
    }

    /// Current snapshot of `key`, or `None` if absent or still being created.
    pub fn lookup(&self, key: &K) -> Option<Entry<A>> {
        // SAFETY: `find` only returns slots observed READY with acquire ordering.
        self.find(key).map(|slot| unsafe { slot.entry() })
    }

    /// Atomically add `delta` to an existing entry and return the new count.
    pub fn fetch_add(&self, key: &K, delta: u64) -> Option<u64> {
        self.find(key).map(|slot| {
            slot.count
                .fetch_add(delta, Ordering::Relaxed)
                .wrapping_add(delta)
        })
    }

    /// Create `key` or overwrite the count of the existing entry.
    ///
    /// Failures are counted in `dropped()`; the caller should treat them as
    /// "event dropped" and never retry.
    pub fn upsert(&self, key: K, entry: Entry<A>) -> Result<Upserted, UpdateError> {
        self.place(key, entry).map(|placed| match placed {
            Placement::Created => Upserted::Created,
            Placement::Existing(slot) => {
                slot.count.store(entry.count, Ordering::Relaxed);
                Upserted::Overwritten
            }
        })
    }

    /// Create `key` with `entry`, or atomically add `entry.count` to the
    /// existing entry. The count of a key never decreases through this path.
    ///
    /// Failures are counted in `dropped()`, as for `upsert`.
    pub fn insert_or_add(&self, key: K, entry: Entry<A>) -> Result<Inserted, UpdateError> {
        self.place(key, entry).map(|placed| match placed {
            Placement::Created => Inserted::Created,
            Placement::Existing(slot) => Inserted::Added(
                slot.count
                    .fetch_add(entry.count, Ordering::Relaxed)
                    .wrapping_add(entry.count),
            ),
        })
    }

    /// Iterate over published entries. Concurrent writers are not blocked, so
    /// counts may move while iterating.
    pub fn iter(&self) -> impl Iterator<Item = (K, Entry<A>)> + '_ {
        self.slots.iter().filter_map(|slot| {
            if slot.tag.load(Ordering::Acquire) & READY == 0 {
                return None;
            }
            // SAFETY: READY observed with acquire ordering just above.
            Some(unsafe { (slot.key(), slot.entry()) })
        })
    }

    /// Number of entries, including creations still in flight.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Upserts that failed since creation (or the last `clear`).
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Remove every entry. Requires exclusive access.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot.tag.get_mut() = EMPTY;
            *slot.count.get_mut() = 0;
        }
        *self.len.get_mut() = 0;
        *self.dropped.get_mut() = 0;
    }

    fn locate(&self, key: &K) -> (u64, usize) {
        let hash = self.hasher.hash_one(key);
        // High bit keeps the fingerprint non-zero; low bits hold the state.
        let fingerprint = (hash << 2) | (1 << 63);
        (fingerprint, hash as usize & self.mask)
    }

    fn find(&self, key: &K) -> Option<&Slot<K, A>> {
        let (fingerprint, mut idx) = self.locate(key);
        for _ in 0..self.slots.len() {
            let slot = &self.slots[idx];
            let tag = slot.tag.load(Ordering::Acquire);
            if tag == EMPTY {
                return None;
            }
            // SAFETY: tag is READY, observed with acquire ordering.
            if tag == fingerprint | READY && unsafe { slot.key() } == *key {
                return Some(slot);
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }

    fn place(&self, key: K, entry: Entry<A>) -> Result<Placement<'_, K, A>, UpdateError> {
        let result = self.try_place(key, entry);
        if result.is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn try_place(&self, key: K, entry: Entry<A>) -> Result<Placement<'_, K, A>, UpdateError> {
        let (fingerprint, mut idx) = self.locate(&key);
        for _ in 0..self.slots.len() {
            let slot = &self.slots[idx];
            let mut tag = slot.tag.load(Ordering::Acquire);

            if tag == EMPTY {
                if !self.reserve() {
                    return Err(UpdateError::CapacityExceeded {
                        capacity: self.capacity,
                    });
                }
                match slot.tag.compare_exchange(
                    EMPTY,
                    fingerprint | CLAIMED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS above made this context the only writer.
                        unsafe { slot.publish(key, entry, fingerprint) };
                        return Ok(Placement::Created);
                    }
                    Err(current) => {
                        self.unreserve();
                        tag = current;
                    }
                }
            }

            if tag & !STATE_MASK == fingerprint {
                if tag & STATE_MASK == CLAIMED && !slot.await_publish() {
                    return Err(UpdateError::Contended);
                }
                // SAFETY: the slot is READY (checked or awaited with acquire ordering).
                if unsafe { slot.key() } == key {
                    return Ok(Placement::Existing(slot));
                }
            }

            idx = (idx + 1) & self.mask;
        }

        Err(UpdateError::CapacityExceeded {
            capacity: self.capacity,
        })
    }

    fn reserve(&self) -> bool {
        self.len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok()
    }

    fn unreserve(&self) {
        self.len.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<K, A> fmt::Debug for CounterTable<K, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterTable")
            .field("capacity", &self.capacity)
            .field("slots", &self.slots.len())
            .field("len", &self.len.load(Ordering::Relaxed))
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evtally_common::CommKey;

    // ut_lookup_missing: empty table never reports an entry
    #[test]
    fn ut_lookup_missing() {
        let table: CounterTable<u32> = CounterTable::with_capacity(8).unwrap();
        assert_eq!(table.lookup(&1), None);
        assert_eq!(table.fetch_add(&1, 1), None);
        assert!(table.is_empty());
    }

    // ut_upsert_creates_then_overwrites
    #[test]
    fn ut_upsert_creates_then_overwrites() {
        let table: CounterTable<u32> = CounterTable::with_capacity(8).unwrap();
        assert_eq!(table.upsert(42, Entry::with_count(1)), Ok(Upserted::Created));
        assert_eq!(table.lookup(&42), Some(Entry::with_count(1)));

        assert_eq!(
            table.upsert(42, Entry::with_count(7)),
            Ok(Upserted::Overwritten)
        );
        assert_eq!(table.lookup(&42).map(|e| e.count), Some(7));
        assert_eq!(table.len(), 1);
    }

    // ut_overwrite_keeps_aux: auxiliary fields are fixed by the creator
    #[test]
    fn ut_overwrite_keeps_aux() {
        let table: CounterTable<u32, u16> = CounterTable::with_capacity(4).unwrap();
        table.upsert(1, Entry { count: 1, aux: 11 }).unwrap();
        table.upsert(1, Entry { count: 5, aux: 99 }).unwrap();
        assert_eq!(table.lookup(&1), Some(Entry { count: 5, aux: 11 }));
    }

    // ut_fetch_add_existing
    #[test]
    fn ut_fetch_add_existing() {
        let table: CounterTable<u32> = CounterTable::with_capacity(4).unwrap();
        table.upsert(3, Entry::with_count(1)).unwrap();
        assert_eq!(table.fetch_add(&3, 1), Some(2));
        assert_eq!(table.fetch_add(&3, 10), Some(12));
        assert_eq!(table.lookup(&3).unwrap().count, 12);
    }

    // ut_fetch_add_wraps: overflow wraps, never panics
    #[test]
    fn ut_fetch_add_wraps() {
        let table: CounterTable<u32> = CounterTable::with_capacity(4).unwrap();
        table.upsert(3, Entry::with_count(u64::MAX)).unwrap();
        assert_eq!(table.fetch_add(&3, 2), Some(1));
    }

    // ut_insert_or_add_accumulates: an existing key gains the count, aux untouched
    #[test]
    fn ut_insert_or_add_accumulates() {
        let table: CounterTable<u32, u16> = CounterTable::with_capacity(4).unwrap();
        assert_eq!(
            table.insert_or_add(8, Entry { count: 1, aux: 3 }),
            Ok(Inserted::Created)
        );
        table.fetch_add(&8, 40).unwrap();
        assert_eq!(
            table.insert_or_add(8, Entry { count: 1, aux: 99 }),
            Ok(Inserted::Added(42))
        );
        assert_eq!(table.lookup(&8), Some(Entry { count: 42, aux: 3 }));
        assert_eq!(table.len(), 1);
    }

    // ut_insert_or_add_when_full: new keys are dropped, existing keys still add
    #[test]
    fn ut_insert_or_add_when_full() {
        let table: CounterTable<u32> = CounterTable::with_capacity(1).unwrap();
        table.insert_or_add(1, Entry::with_count(1)).unwrap();
        assert_eq!(
            table.insert_or_add(2, Entry::with_count(1)),
            Err(UpdateError::CapacityExceeded { capacity: 1 })
        );
        assert_eq!(table.insert_or_add(1, Entry::with_count(1)), Ok(Inserted::Added(2)));
        assert_eq!(table.dropped(), 1);
    }

    // ut_capacity_exceeded: the (capacity + 1)th key is rejected and counted
    #[test]
    fn ut_capacity_exceeded() {
        let table: CounterTable<u32> = CounterTable::with_capacity(3).unwrap();
        for pid in 0..3 {
            table.upsert(pid, Entry::with_count(pid as u64 + 1)).unwrap();
        }
        assert_eq!(
            table.upsert(100, Entry::with_count(1)),
            Err(UpdateError::CapacityExceeded { capacity: 3 })
        );
        assert_eq!(table.dropped(), 1);
        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup(&100), None);

        // Existing keys can still be overwritten when full.
        assert_eq!(
            table.upsert(1, Entry::with_count(9)),
            Ok(Upserted::Overwritten)
        );
        assert_eq!(table.lookup(&0).unwrap().count, 1);
        assert_eq!(table.lookup(&2).unwrap().count, 3);
    }

    // ut_contended_claim: a same-fingerprint slot that never publishes drops the event
    #[test]
    fn ut_contended_claim() {
        let table: CounterTable<u32> = CounterTable::with_capacity(4).unwrap();
        let (fingerprint, idx) = table.locate(&5);
        table.slots[idx]
            .tag
            .store(fingerprint | CLAIMED, Ordering::Release);

        assert_eq!(
            table.upsert(5, Entry::with_count(1)),
            Err(UpdateError::Contended)
        );
        assert_eq!(table.dropped(), 1);
        // A claimed-but-unpublished slot is invisible to readers.
        assert_eq!(table.lookup(&5), None);
    }

    // ut_iter_yields_published_entries
    #[test]
    fn ut_iter_yields_published_entries() {
        let table: CounterTable<u32> = CounterTable::with_capacity(16).unwrap();
        for pid in 1..=5 {
            table.upsert(pid, Entry::with_count(pid as u64 * 10)).unwrap();
        }
        let mut entries: Vec<_> = table.iter().map(|(k, e)| (k, e.count)).collect();
        entries.sort();
        assert_eq!(entries, vec![(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)]);
    }

    // ut_comm_keys: fixed-width byte-string keys
    #[test]
    fn ut_comm_keys() {
        let table: CounterTable<CommKey> = CounterTable::with_capacity(4).unwrap();
        table
            .upsert(CommKey::from_comm(b"bash"), Entry::with_count(1))
            .unwrap();
        assert!(table.lookup(&CommKey::from_comm(b"bash\0\0")).is_some());
        assert!(table.lookup(&CommKey::from_comm(b"bas")).is_none());
    }

    // ut_clear_resets_everything
    #[test]
    fn ut_clear_resets_everything() {
        let mut table: CounterTable<u32> = CounterTable::with_capacity(1).unwrap();
        table.upsert(1, Entry::with_count(1)).unwrap();
        let _ = table.upsert(2, Entry::with_count(1));
        assert_eq!(table.dropped(), 1);

        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.dropped(), 0);
        assert_eq!(table.lookup(&1), None);
        assert_eq!(table.upsert(2, Entry::with_count(1)), Ok(Upserted::Created));
    }

    // ut_zero_capacity_rejected
    #[test]
    fn ut_zero_capacity_rejected() {
        let result: Result<CounterTable<u32>, _> = CounterTable::with_capacity(0);
        assert!(matches!(result, Err(EvtallyError::InvalidConfig(_))));
    }

    // ut_arena_sized_power_of_two
    #[test]
    fn ut_arena_sized_power_of_two() {
        let table: CounterTable<u32> = CounterTable::with_capacity(1000).unwrap();
        assert_eq!(table.slots.len(), 2048);
        assert_eq!(table.capacity(), 1000);
    }
}
