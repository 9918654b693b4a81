//! Monotonic elapsed-time source shared by the runtime tasks.

use std::time::Instant;

/// Microsecond clock counting from process start.
///
/// All core timestamps (debounce freshness, frame ticks, watchdog ages) are
/// elapsed microseconds from a single origin so they compare directly.
/// Wall-clock time is never consulted.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
