use std::num::NonZeroU32;

/// Per-execution-context event counter that decides when to report.
///
/// Owned by exactly one worker (it is `&mut` on every tick), so it needs no
/// synchronisation. Contexts never merge their counters.
#[derive(Debug, Clone)]
pub struct SamplingCounter {
    count: u32,
    threshold: NonZeroU32,
}

impl SamplingCounter {
    pub fn new(threshold: NonZeroU32) -> Self {
        Self {
            count: 0,
            threshold,
        }
    }

    /// Count one event. Returns `true` when the threshold is reached, in
    /// which case the counter is already back at zero.
    pub fn tick(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.threshold.get() {
            self.count = 0;
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold.get()
    }
}
