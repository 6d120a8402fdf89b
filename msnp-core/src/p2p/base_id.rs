use rand::RngCore;
use rand::rng;
use std::sync::atomic::{AtomicU32, Ordering};

/// Identifier source for outgoing P2P messages. Seeded randomly per
/// manager and incremented for every message sent.
pub(crate) struct BaseIdGenerator {
    current: AtomicU32,
}

impl BaseIdGenerator {
    pub(crate) fn new() -> Self {
        Self {
            // Half the range keeps a long run of increments away from wrapping
            current: AtomicU32::new(rng().next_u32() / 2),
        }
    }

    pub(crate) fn next(&self) -> u32 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }
}
