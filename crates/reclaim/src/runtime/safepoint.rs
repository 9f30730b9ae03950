//! Safepoint Management
//!
//! A pause stops every registered mutator at a poll point. Swap-out and
//! `unlock_all_entries` require one from the reclamation table's own
//! safepoint: the [`PauseGuard`] returned by [`Safepoint::pause`] is the
//! token those operations take, and they check where it came from.
//!
//! ## Safepoint States
//!
//! ```text
//! SAFEPOINT_NONE (0) ─────┐
//!     │                   │
//!     ▼                   │
//! SAFEPOINT_REQUESTED (1) │
//!     │                   │
//!     ▼                   │
//! SAFEPOINT_REACHED (2) ──┘ (guard dropped)
//! ```
//!
//! Mutators call [`Safepoint::poll`] between operations. A thread inside a
//! handshake is not at a poll point, so while a pause is held no entry has
//! a mutator between lock and unlock.

use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// Pause states
pub const SAFEPOINT_NONE: u8 = 0;
pub const SAFEPOINT_REQUESTED: u8 = 1;
pub const SAFEPOINT_REACHED: u8 = 2;

/// Coordination point between the pausing thread and mutators
///
/// # Examples
///
/// ```rust
/// use reclaim::runtime::Safepoint;
///
/// let safepoint = Safepoint::new(0);
/// {
///     let pause = safepoint.pause();
///     assert!(pause.threads_stopped() == 0);
/// }
/// assert!(!safepoint.is_requested());
/// ```
pub struct Safepoint {
    /// Pause state
    state: AtomicU8,

    /// Mutators parked in the current pause
    paused_threads: AtomicUsize,

    /// Bumped as each pause ends; parked mutators wait for it to move
    epoch: AtomicU64,

    /// Registered mutators a pause waits for
    total_threads: AtomicUsize,

    /// One pause at a time
    serial: Mutex<()>,
}

impl Safepoint {
    /// Safepoint expecting `total_threads` registered mutators
    pub fn new(total_threads: usize) -> Self {
        Self {
            state: AtomicU8::new(SAFEPOINT_NONE),
            paused_threads: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            total_threads: AtomicUsize::new(total_threads),
            serial: Mutex::new(()),
        }
    }

    /// Stop every registered mutator
    ///
    /// Returns once all of them are parked at a poll point. The caller must
    /// not itself be a registered mutator. Mutators resume when the guard
    /// is dropped.
    pub fn pause(&self) -> PauseGuard<'_> {
        let serial = self.serial.lock();
        self.request_safepoint();
        self.wait_for_safepoint();
        PauseGuard {
            safepoint: self,
            stopped: self.paused_threads.load(Ordering::Acquire),
            _serial: serial,
        }
    }

    fn request_safepoint(&self) {
        self.state.store(SAFEPOINT_REQUESTED, Ordering::SeqCst);
    }

    fn wait_for_safepoint(&self) {
        while self.paused_threads.load(Ordering::Acquire)
            < self.total_threads.load(Ordering::Acquire)
        {
            std::thread::yield_now();
        }
    }

    fn arrive(&self) {
        self.paused_threads.fetch_add(1, Ordering::AcqRel);
        self.state.store(SAFEPOINT_REACHED, Ordering::Release);
    }

    fn release_safepoint(&self) {
        self.paused_threads.store(0, Ordering::Release);
        self.state.store(SAFEPOINT_NONE, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Check if a pause is requested
    #[inline]
    pub fn is_requested(&self) -> bool {
        self.state.load(Ordering::Acquire) != SAFEPOINT_NONE
    }

    /// One of the `SAFEPOINT_*` constants
    pub fn get_state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    /// Mutator poll point; parks the caller while a pause is held
    ///
    /// Returns true if the thread was parked.
    #[inline]
    pub fn poll(&self) -> bool {
        if !self.is_requested() {
            return false;
        }
        self.block_until_released();
        true
    }

    // Waits on the epoch rather than the state, so a pause requested right
    // after this one ends cannot keep the thread parked.
    fn block_until_released(&self) {
        let epoch = self.epoch.load(Ordering::Acquire);
        self.arrive();
        while self.epoch.load(Ordering::Acquire) == epoch {
            std::thread::yield_now();
        }
    }

    /// Register a mutator thread
    pub fn register_thread(&self) {
        self.total_threads.fetch_add(1, Ordering::AcqRel);
    }

    /// Unregister a mutator thread
    pub fn unregister_thread(&self) {
        let _ = self
            .total_threads
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Number of threads at safepoint
    pub fn threads_at_safepoint(&self) -> usize {
        self.paused_threads.load(Ordering::Acquire)
    }

    /// Registered mutator count
    pub fn total_threads(&self) -> usize {
        self.total_threads.load(Ordering::Acquire)
    }
}

impl Default for Safepoint {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Proof that every registered mutator is stopped
///
/// Releases the safepoint on drop.
pub struct PauseGuard<'a> {
    safepoint: &'a Safepoint,
    stopped: usize,
    _serial: MutexGuard<'a, ()>,
}

impl PauseGuard<'_> {
    /// Mutators parked when the pause was established
    pub fn threads_stopped(&self) -> usize {
        self.stopped
    }

    /// Whether this pause was issued by `safepoint`
    pub fn is_for(&self, safepoint: &Safepoint) -> bool {
        std::ptr::eq(self.safepoint, safepoint)
    }
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.safepoint.release_safepoint();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_pause_without_mutators() {
        let safepoint = Safepoint::new(0);
        let pause = safepoint.pause();
        assert!(safepoint.is_requested());
        assert_eq!(pause.threads_stopped(), 0);
        drop(pause);
        assert_eq!(safepoint.get_state(), SAFEPOINT_NONE);
    }

    #[test]
    fn test_pause_identity() {
        let a = Safepoint::new(0);
        let b = Safepoint::new(0);
        let pause = a.pause();
        assert!(pause.is_for(&a));
        assert!(!pause.is_for(&b));
    }

    #[test]
    fn test_poll_without_request() {
        let safepoint = Safepoint::new(1);
        assert!(!safepoint.poll());
    }

    #[test]
    fn test_register_unregister() {
        let safepoint = Safepoint::new(0);
        safepoint.register_thread();
        safepoint.register_thread();
        assert_eq!(safepoint.total_threads(), 2);
        safepoint.unregister_thread();
        safepoint.unregister_thread();
        safepoint.unregister_thread();
        assert_eq!(safepoint.total_threads(), 0);
    }

    /// **Invariant verified:** the pause is only granted once every mutator is parked
    #[test]
    fn test_pause_stops_mutators() {
        let safepoint = Arc::new(Safepoint::new(2));
        let stop = Arc::new(AtomicBool::new(false));
        let start = Arc::new(Barrier::new(3));

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let safepoint = Arc::clone(&safepoint);
                let stop = Arc::clone(&stop);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    let mut parked = 0;
                    while !stop.load(Ordering::Acquire) {
                        if safepoint.poll() {
                            parked += 1;
                        }
                        std::hint::spin_loop();
                    }
                    parked
                })
            })
            .collect();

        start.wait();
        {
            let pause = safepoint.pause();
            assert_eq!(pause.threads_stopped(), 2);
            assert_eq!(safepoint.threads_at_safepoint(), 2);
        }
        stop.store(true, Ordering::Release);

        let parked: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
        assert_eq!(parked, 2);
    }
}
