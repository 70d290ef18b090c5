//! Correlation id generation for requests
//!
//! Every request sent over a connection carries a fresh id so its response can be
//! matched back to the waiting caller.

use std::sync::atomic::{AtomicU64, Ordering};

/// Starting value for correlation ids
const INITIAL_REQUEST_ID: u64 = 1;

/// Thread-safe id generator using atomic operations
#[derive(Debug)]
pub(crate) struct IdGenerator {
    next_id: AtomicU64,
}

impl IdGenerator {
    /// Creates a new id generator with the specified starting value
    pub fn new(start: u64) -> Self {
        Self {
            next_id: AtomicU64::new(start),
        }
    }

    /// Gets the next id, incrementing the internal counter
    pub fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(INITIAL_REQUEST_ID)
    }
}
