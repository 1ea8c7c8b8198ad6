//! Monotonic millisecond timer used for polling loops and fixed delays.

use std::time::{Duration, Instant};

/// Monotonic time source with blocking delay.
pub trait Timer {
    /// Milliseconds since an arbitrary fixed point.
    fn now_ms(&self) -> u64;

    /// Block for `ms` milliseconds.
    fn delay_ms(&mut self, ms: u64);

    /// Milliseconds elapsed since `start` (a previous `now_ms()` value).
    fn elapsed_ms(&self, start: u64) -> u64 {
        self.now_ms().saturating_sub(start)
    }
}

/// [`Timer`] backed by `std::time::Instant` and `thread::sleep`.
///
/// On ESP-IDF `thread::sleep` yields to FreeRTOS, so this works for both
/// host and device builds.
#[derive(Debug, Clone)]
pub struct SystemTimer {
    start: Instant,
}

impl SystemTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for SystemTimer {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn delay_ms(&mut self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}
