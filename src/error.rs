/// Application-level errors (configuration, output, thread management).
#[derive(Debug, thiserror::Error)]
pub enum EvtallyError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("serialization error: {0}")]
    Serialization(#[source] std::io::Error),
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("thread error: {0}")]
    Thread(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Outcome of a failed table or slot update inside a handler.
///
/// Handlers never propagate these: the event is dropped and, for tables,
/// counted in the table's drop counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UpdateError {
    #[error("counter table full ({capacity} entries)")]
    CapacityExceeded { capacity: usize },
    #[error("slot still being initialised by a concurrent writer")]
    Contended,
    #[error("aggregate slot {index} out of range ({len} slots)")]
    SlotOutOfRange { index: u32, len: usize },
}

impl UpdateError {
    /// Negative errno, matching what `bpf_map_update_elem` returns in the kernel.
    pub fn code(&self) -> i32 {
        match self {
            UpdateError::CapacityExceeded { .. } => -libc::E2BIG,
            UpdateError::Contended => -libc::EBUSY,
            UpdateError::SlotOutOfRange { .. } => -libc::ENOENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ut_update_error_codes_are_negative_errno() {
        assert_eq!(
            UpdateError::CapacityExceeded { capacity: 4 }.code(),
            -libc::E2BIG
        );
        assert_eq!(UpdateError::Contended.code(), -libc::EBUSY);
        assert!(UpdateError::SlotOutOfRange { index: 9, len: 2 }.code() < 0);
    }

    #[test]
    fn ut_update_error_display() {
        let e = UpdateError::CapacityExceeded { capacity: 1024 };
        assert_eq!(e.to_string(), "counter table full (1024 entries)");
    }
}
