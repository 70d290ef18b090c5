//! Reconnect pacing shared by the transport and connection.

use std::time::Duration;

/// Fibonacci backoff for reconnection attempts: 1, 2, 3, 5, 8, ... units, capped at `max`.
pub(crate) struct FibonacciBackoff {
    previous: u32,
    current: u32,
    unit: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    pub(crate) fn new(unit: Duration, max: Duration) -> Self {
        FibonacciBackoff {
            previous: 0,
            current: 1,
            unit,
            max,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let next = self.previous.saturating_add(self.current);
        self.previous = self.current;
        self.current = next;

        self.unit.saturating_mul(next).min(self.max)
    }
}
