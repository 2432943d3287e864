//! Millisecond time sources for the scheduler.
//!
//! The scheduler never reads wall time directly; it goes through [`Clock`] so
//! that flight code runs against [`SystemClock`] while tests drive a
//! [`ManualClock`] whose `sleep_ms` simply advances virtual time.

use std::cell::Cell;
use std::time::{Duration, Instant};

pub trait Clock {
    /// Milliseconds since the clock was created. Never goes backwards.
    fn now_ms(&self) -> u64;

    /// Block the (single) thread of control for `ms` milliseconds.
    fn sleep_ms(&self, ms: u64);
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }
}

/// Deterministic clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
    slept: Cell<u64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Cell::new(start_ms),
            slept: Cell::new(0),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }

    pub fn set(&self, ms: u64) {
        debug_assert!(ms >= self.now.get(), "manual clock moved backwards");
        self.now.set(ms.max(self.now.get()));
    }

    /// Total virtual time spent inside `sleep_ms`.
    pub fn total_slept_ms(&self) -> u64 {
        self.slept.get()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn sleep_ms(&self, ms: u64) {
        self.slept.set(self.slept.get().saturating_add(ms));
        self.advance(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_sleep_advances_time() {
        let clock = ManualClock::new(500);
        clock.sleep_ms(250);
        assert_eq!(clock.now_ms(), 750);
        assert_eq!(clock.total_slept_ms(), 250);

        clock.advance(50);
        assert_eq!(clock.now_ms(), 800);
        assert_eq!(clock.total_slept_ms(), 250);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_ms();
        clock.sleep_ms(1);
        assert!(clock.now_ms() >= first);
    }
}
