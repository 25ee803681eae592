//! Creation-Time Clocks
//!
//! Every pending operation is stamped with a `CreationTime` when it is
//! queued. Same-key operations are ordered by it, and it is half of the
//! pending-request identity, so a clock must never hand out the same value
//! twice.
//!
//! Implementations:
//! - `MonotonicClock`: nanoseconds since a process-local origin, bumped past
//!   the previous reading when the OS clock is coarser than the enqueue rate
//! - `SimulatedClock`: deterministic ticks for tests and DST

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Logical creation timestamp of a pending operation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct CreationTime(pub u64);

impl std::fmt::Display for CreationTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Source of creation timestamps
///
/// `now()` must be strictly increasing per clock instance, including across
/// threads sharing the clock.
pub trait CreationClock: Send + Sync + 'static {
    fn now(&self) -> CreationTime;
}

impl<C: CreationClock> CreationClock for Arc<C> {
    fn now(&self) -> CreationTime {
        (**self).now()
    }
}

/// Production clock backed by `Instant`
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
    /// Last value handed out
    last: AtomicU64,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            origin: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    fn elapsed_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

impl CreationClock for MonotonicClock {
    fn now(&self) -> CreationTime {
        let reading = self.elapsed_nanos();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            // Ties and clock stalls fall through to last + 1
            let next = reading.max(prev.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return CreationTime(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Simulated clock for deterministic testing
///
/// Each `now()` returns the current tick and then advances it by one.
/// Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    next_tick: Arc<AtomicU64>,
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SimulatedClock {
    /// Create a clock whose first reading is `start`
    pub fn new(start: u64) -> Self {
        SimulatedClock {
            next_tick: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Skip ahead by `ticks`
    pub fn advance(&self, ticks: u64) {
        self.next_tick.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Set the next reading. Moving backwards breaks the ordering contract,
    /// so tests should only ever move forwards.
    pub fn set(&self, tick: u64) {
        self.next_tick.store(tick, Ordering::SeqCst);
    }

    /// Peek at the next reading without consuming it
    pub fn peek(&self) -> CreationTime {
        CreationTime(self.next_tick.load(Ordering::SeqCst))
    }
}

impl CreationClock for SimulatedClock {
    fn now(&self) -> CreationTime {
        CreationTime(self.next_tick.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_monotonic_clock_strictly_increasing() {
        let clock = MonotonicClock::new();
        let mut prev = clock.now();
        for _ in 0..10_000 {
            let next = clock.now();
            assert!(next > prev, "{} should be after {}", next, prev);
            prev = next;
        }
    }

    #[test]
    fn test_monotonic_clock_unique_across_threads() {
        let clock = Arc::new(MonotonicClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || (0..2_000).map(|_| clock.now()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for t in handle.join().unwrap() {
                assert!(seen.insert(t), "duplicate creation time {}", t);
            }
        }
        assert_eq!(seen.len(), 8_000);
    }

    #[test]
    fn test_simulated_clock_deterministic() {
        let clock = SimulatedClock::new(100);

        assert_eq!(clock.now(), CreationTime(100));
        assert_eq!(clock.now(), CreationTime(101));

        clock.advance(10);
        assert_eq!(clock.now(), CreationTime(112));

        clock.set(500);
        assert_eq!(clock.peek(), CreationTime(500));
        assert_eq!(clock.now(), CreationTime(500));
    }

    #[test]
    fn test_simulated_clock_shared() {
        let clock = SimulatedClock::new(0);
        let clock2 = clock.clone();

        clock.now();
        assert_eq!(clock2.now(), CreationTime(1), "Clones should share state");
    }
}
