//! Swap Timer - Timing Utilities

use std::time::{Duration, Instant};

/// Timer for swap operations
pub struct SwapTimer {
    start: Instant,
}

impl SwapTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed microseconds
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed().as_micros() as u64
    }
}

impl Default for SwapTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_advances() {
        let timer = SwapTimer::new();
        std::thread::sleep(Duration::from_millis(2));
        assert!(timer.elapsed_us() >= 2_000);
    }
}
