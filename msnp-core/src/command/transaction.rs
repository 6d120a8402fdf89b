use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic transaction ID source shared by everything that sends
/// through one session. The first ID handed out is 1.
pub struct TransactionId(AtomicU64);

impl TransactionId {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}
