//! Aggregate slot counters: a small array of pre-initialised atomics.
//!
//! Every index exists from construction, so there is no first-touch race and
//! every update is a true fetch-and-add. Each slot sits on its own cache line.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::error::{EvtallyError, UpdateError};

pub struct AggregateSlots {
    slots: Box<[CachePadded<AtomicU64>]>,
}

impl AggregateSlots {
    pub fn new(len: usize) -> Result<Self, EvtallyError> {
        if len == 0 {
            return Err(EvtallyError::InvalidConfig(
                "aggregate slot array must have at least one slot".to_string(),
            ));
        }
        let slots = (0..len)
            .map(|_| CachePadded::new(AtomicU64::new(0)))
            .collect();
        Ok(Self { slots })
    }

    /// Add `delta` to slot `index` and return the previous value.
    ///
    /// Lossless under any number of concurrent callers; wraps on overflow.
    pub fn add(&self, index: u32, delta: u64) -> Result<u64, UpdateError> {
        Ok(self.slot(index)?.fetch_add(delta, Ordering::Relaxed))
    }

    pub fn get(&self, index: u32) -> Option<u64> {
        self.slot(index).ok().map(|s| s.load(Ordering::Relaxed))
    }

    /// Zero slot `index` and return what it held. Never called by handlers.
    pub fn reset(&self, index: u32) -> Result<u64, UpdateError> {
        Ok(self.slot(index)?.swap(0, Ordering::Relaxed))
    }

    /// Independent reads of every slot, not a joint snapshot.
    pub fn values(&self) -> Vec<u64> {
        self.slots.iter().map(|s| s.load(Ordering::Relaxed)).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, index: u32) -> Result<&AtomicU64, UpdateError> {
        self.slots
            .get(index as usize)
            .map(|s| &**s)
            .ok_or(UpdateError::SlotOutOfRange {
                index,
                len: self.slots.len(),
            })
    }
}

impl fmt::Debug for AggregateSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.values()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ut_add_returns_previous() {
        let slots = AggregateSlots::new(2).unwrap();
        assert_eq!(slots.add(0, 1), Ok(0));
        assert_eq!(slots.add(0, 1), Ok(1));
        assert_eq!(slots.add(1, 1500), Ok(0));
        assert_eq!(slots.values(), vec![2, 1500]);
    }

    #[test]
    fn ut_out_of_range() {
        let slots = AggregateSlots::new(2).unwrap();
        assert_eq!(
            slots.add(2, 1),
            Err(UpdateError::SlotOutOfRange { index: 2, len: 2 })
        );
        assert_eq!(slots.get(5), None);
    }

    #[test]
    fn ut_add_wraps_on_overflow() {
        let slots = AggregateSlots::new(1).unwrap();
        slots.add(0, u64::MAX).unwrap();
        slots.add(0, 2).unwrap();
        assert_eq!(slots.get(0), Some(1));
    }

    #[test]
    fn ut_reset_is_external_only() {
        let slots = AggregateSlots::new(1).unwrap();
        slots.add(0, 42).unwrap();
        assert_eq!(slots.reset(0), Ok(42));
        assert_eq!(slots.get(0), Some(0));
    }

    #[test]
    fn ut_zero_len_rejected() {
        assert!(AggregateSlots::new(0).is_err());
    }
}
