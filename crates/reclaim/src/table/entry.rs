//! Table Entry - Per-Object Swap Metadata
//!
//! Entry Layout (24 bytes on 64-bit):
//! ┌─────────────────────────────────────────┐
//! │ Flags (1 byte)       <- AtomicU8        │
//! │  - Bit 0: Occupied                      │
//! │  - Bit 1: Kernel lock                   │
//! │  - Bit 2: Resident                      │
//! │ App lock counter (1 byte) <- AtomicU8   │
//! │ Page count (2 bytes) <- AtomicU16       │
//! ├─────────────────────────────────────────┤
//! │ Object address (8 bytes)                │  <- resident payload
//! ├─────────────────────────────────────────┤
//! │ Stub back-pointer (8 bytes)             │  <- address of the stub
//! └─────────────────────────────────────────┘
//!
//! Every flag transition is one atomic read-modify-write on the flag byte.
//! The layout is `#[repr(C)]` and all-zero is the free state, so entries can
//! live directly in zero-filled mapped memory.
//!
//! # App-thread handshake
//!
//! A mutator locks an entry with [`TableEntry::lock_from_app_thread`]:
//!
//! ```text
//! spin while kernel_lock
//! counter += 1
//! spin while kernel_lock
//! counter += 1
//! ```
//!
//! and releases with [`TableEntry::unlock_from_app_thread`], which
//! decrements once. Each lock/unlock pair leaves the counter one higher;
//! the counter is only returned to zero by `unlock_all_entries` during a
//! pause. The kernel role never blocks: it sets the lock bit with one
//! `fetch_or` and clears it with one `fetch_and`.

use crossbeam::utils::Backoff;
use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU8, AtomicUsize, Ordering};

/// Flag bit positions
pub const OCCUPIED_BIT: u8 = 0;
pub const KERNEL_LOCK_BIT: u8 = 1;
pub const RESIDENT_BIT: u8 = 2;

/// Masks for the flag byte
pub const OCCUPIED_MASK: u8 = 1 << OCCUPIED_BIT;
pub const KERNEL_LOCK_MASK: u8 = 1 << KERNEL_LOCK_BIT;
pub const RESIDENT_MASK: u8 = 1 << RESIDENT_BIT;

/// Handle naming one slot of a [`ReclamationTable`](super::ReclamationTable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryHandle(u32);

impl EntryHandle {
    pub(crate) fn new(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize);
        EntryHandle(index as u32)
    }

    /// Rebuild a handle from a raw index (compiled code, C ABI)
    pub const fn from_raw(index: u32) -> Self {
        EntryHandle(index)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tagged view of the occupied/resident bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Slot available for `create_entry`
    Free,
    /// Bound to a stub, payload in secondary storage
    NonResident,
    /// Bound to a stub, payload in memory at `object_address`
    Resident,
}

impl EntryState {
    fn from_flags(flags: u8) -> Self {
        if flags & OCCUPIED_MASK == 0 {
            EntryState::Free
        } else if flags & RESIDENT_MASK == 0 {
            EntryState::NonResident
        } else {
            EntryState::Resident
        }
    }
}

/// Which of the two spins of the handshake is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    First,
    Second,
}

/// Observer for the app-thread handshake
///
/// Called between the atomic steps of [`TableEntry::lock_from_app_thread_observed`].
/// A probe may block, which lets a test scheduler force any interleaving
/// of several threads against a kernel actor.
pub trait HandshakeProbe {
    /// After each load of the kernel-lock bit
    fn on_poll(&mut self, _phase: HandshakePhase, _kernel_locked: bool) {}

    /// After each counter increment, with the counter value it produced
    fn on_increment(&mut self, _phase: HandshakePhase, _counter: u8) {}
}

/// Probe that observes nothing
pub struct NoProbe;

impl HandshakeProbe for NoProbe {}

/// Swap metadata for one swapped-out object
#[repr(C)]
pub struct TableEntry {
    flags: AtomicU8,
    app_lock_counter: AtomicU8,
    page_count: AtomicU16,
    object_address: AtomicUsize,
    stub_back_pointer: AtomicUsize,
}

impl TableEntry {
    /// Entry in the free state
    pub const fn new() -> Self {
        Self {
            flags: AtomicU8::new(0),
            app_lock_counter: AtomicU8::new(0),
            page_count: AtomicU16::new(0),
            object_address: AtomicUsize::new(0),
            stub_back_pointer: AtomicUsize::new(0),
        }
    }

    // === Flag Operations ===

    #[inline]
    fn test_flag(&self, mask: u8) -> bool {
        self.flags.load(Ordering::SeqCst) & mask != 0
    }

    #[inline]
    fn set_flag(&self, mask: u8) -> bool {
        self.flags.fetch_or(mask, Ordering::SeqCst) & mask != 0
    }

    #[inline]
    fn clear_flag(&self, mask: u8) -> bool {
        self.flags.fetch_and(!mask, Ordering::SeqCst) & mask != 0
    }

    #[inline]
    pub fn occupied_bit(&self) -> bool {
        self.test_flag(OCCUPIED_MASK)
    }

    /// Returns true if the bit was already set
    #[inline]
    pub fn set_occupied_bit(&self) -> bool {
        self.set_flag(OCCUPIED_MASK)
    }

    #[inline]
    pub fn clear_occupied_bit(&self) -> bool {
        self.clear_flag(OCCUPIED_MASK)
    }

    #[inline]
    pub fn kernel_lock_bit(&self) -> bool {
        self.test_flag(KERNEL_LOCK_MASK)
    }

    #[inline]
    pub fn set_kernel_lock_bit(&self) -> bool {
        self.set_flag(KERNEL_LOCK_MASK)
    }

    #[inline]
    pub fn clear_kernel_lock_bit(&self) -> bool {
        self.clear_flag(KERNEL_LOCK_MASK)
    }

    #[inline]
    pub fn resident_bit(&self) -> bool {
        self.test_flag(RESIDENT_MASK)
    }

    #[inline]
    pub fn set_resident_bit(&self) -> bool {
        self.set_flag(RESIDENT_MASK)
    }

    #[inline]
    pub fn clear_resident_bit(&self) -> bool {
        self.clear_flag(RESIDENT_MASK)
    }

    /// Current state, independent of the kernel lock
    pub fn state(&self) -> EntryState {
        EntryState::from_flags(self.flags.load(Ordering::SeqCst))
    }

    /// Raw flag byte
    pub fn flags(&self) -> u8 {
        self.flags.load(Ordering::SeqCst)
    }

    // === Metadata ===

    #[inline]
    pub fn app_lock_counter(&self) -> u8 {
        self.app_lock_counter.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn page_count(&self) -> u16 {
        self.page_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_page_count(&self, pages: u16) {
        self.page_count.store(pages, Ordering::Release);
    }

    /// Address of the resident payload; meaningless while not resident
    #[inline]
    pub fn object_address(&self) -> usize {
        self.object_address.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_object_address(&self, address: usize) {
        self.object_address.store(address, Ordering::Release);
    }

    #[inline]
    pub fn stub_back_pointer(&self) -> usize {
        self.stub_back_pointer.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_stub_back_pointer(&self, address: usize) {
        self.stub_back_pointer.store(address, Ordering::Release);
    }

    /// Return every field to the free state; the flag byte goes last
    pub(crate) fn reset(&self) {
        self.app_lock_counter.store(0, Ordering::SeqCst);
        self.page_count.store(0, Ordering::Relaxed);
        self.object_address.store(0, Ordering::Relaxed);
        self.stub_back_pointer.store(0, Ordering::Relaxed);
        self.flags.store(0, Ordering::SeqCst);
    }

    /// Clear the kernel lock and zero the counter
    pub(crate) fn clear_locks(&self) -> bool {
        let was_locked = self.clear_kernel_lock_bit();
        let counter = self.app_lock_counter.swap(0, Ordering::SeqCst);
        was_locked || counter != 0
    }

    // === App-Thread Handshake ===

    #[inline]
    fn increment_app_lock_counter(&self) -> u8 {
        self.app_lock_counter
            .fetch_add(1, Ordering::SeqCst)
            .wrapping_add(1)
    }

    #[inline]
    fn decrement_app_lock_counter(&self) -> u8 {
        self.app_lock_counter
            .fetch_sub(1, Ordering::SeqCst)
            .wrapping_sub(1)
    }

    fn wait_kernel_unlocked<P: HandshakeProbe>(&self, phase: HandshakePhase, probe: &mut P) -> u64 {
        let backoff = Backoff::new();
        let mut polls = 0u64;
        loop {
            let locked = self.kernel_lock_bit();
            polls += 1;
            probe.on_poll(phase, locked);
            if !locked {
                return polls;
            }
            backoff.snooze();
        }
    }

    /// Lock the entry on behalf of a mutator thread
    ///
    /// Spins without blocking while the kernel holds the entry. There is no
    /// timeout; a kernel lock that is never released keeps the caller here.
    /// Returns the number of kernel-lock polls performed.
    #[inline]
    pub fn lock_from_app_thread(&self) -> u64 {
        self.lock_from_app_thread_observed(&mut NoProbe)
    }

    /// [`lock_from_app_thread`](Self::lock_from_app_thread) with a probe
    /// notified between the atomic steps
    pub fn lock_from_app_thread_observed<P: HandshakeProbe>(&self, probe: &mut P) -> u64 {
        let mut polls = self.wait_kernel_unlocked(HandshakePhase::First, probe);
        let counter = self.increment_app_lock_counter();
        probe.on_increment(HandshakePhase::First, counter);

        polls += self.wait_kernel_unlocked(HandshakePhase::Second, probe);
        let counter = self.increment_app_lock_counter();
        probe.on_increment(HandshakePhase::Second, counter);

        polls
    }

    /// Release a mutator lock; decrements the counter once
    #[inline]
    pub fn unlock_from_app_thread(&self) -> u8 {
        self.decrement_app_lock_counter()
    }

    // === Kernel Role ===

    /// Take the kernel lock with a single `fetch_or`
    ///
    /// Returns true if this call set the bit.
    #[inline]
    pub fn try_kernel_lock(&self) -> bool {
        !self.set_kernel_lock_bit()
    }

    /// Release the kernel lock with a single `fetch_and`
    #[inline]
    pub fn kernel_unlock(&self) {
        self.clear_kernel_lock_bit();
    }
}

impl Default for TableEntry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableEntry")
            .field("state", &self.state())
            .field("kernel_locked", &self.kernel_lock_bit())
            .field("app_lock_counter", &self.app_lock_counter())
            .field("page_count", &self.page_count())
            .field("object_address", &format_args!("{:#x}", self.object_address()))
            .field(
                "stub_back_pointer",
                &format_args!("{:#x}", self.stub_back_pointer()),
            )
            .finish()
    }
}
