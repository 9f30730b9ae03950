//! Object Header - Per-Object Flag Word
//!
//! Header Layout (8 bytes):
//! ┌─────────────────────────────────────────┐
//! │         Flags (4 bytes)                 │  <- AtomicU32
//! │  - Bit 0: Stub                          │
//! │  - Bit 1: No-swap (sticky)              │
//! │  - Bit 2: Read                          │
//! │  - Bit 3: Write                         │
//! │  - Bit 4: Dirty                         │
//! │  - Bit 5: Ignore-read                   │
//! ├─────────────────────────────────────────┤
//! │       Class id (4 bytes)                │  <- AtomicU32
//! └─────────────────────────────────────────┘
//!
//! The stub bit is what every accessor tests first. Read/write/dirty are
//! access-tracking bits an external victim selector consumes; a stub keeps
//! a cached copy of them so it can be inspected without a swap-in.

use std::sync::atomic::{AtomicU32, Ordering};

/// Size of object header in bytes
pub const HEADER_SIZE: usize = 8;

/// Flag bit positions
pub const STUB_BIT: u32 = 0;
pub const NO_SWAP_BIT: u32 = 1;
pub const READ_BIT: u32 = 2;
pub const WRITE_BIT: u32 = 3;
pub const DIRTY_BIT: u32 = 4;
pub const IGNORE_READ_BIT: u32 = 5;

/// Masks for the flag word
pub const STUB_MASK: u32 = 1 << STUB_BIT;
pub const NO_SWAP_MASK: u32 = 1 << NO_SWAP_BIT;
pub const READ_MASK: u32 = 1 << READ_BIT;
pub const WRITE_MASK: u32 = 1 << WRITE_BIT;
pub const DIRTY_MASK: u32 = 1 << DIRTY_BIT;
pub const IGNORE_READ_MASK: u32 = 1 << IGNORE_READ_BIT;
pub const ACCESS_MASK: u32 = READ_MASK | WRITE_MASK | DIRTY_MASK;

/// Object Header
#[repr(C)]
pub struct ObjectHeader {
    flags: AtomicU32,
    class_id: AtomicU32,
}

impl ObjectHeader {
    /// Header of a regular object
    pub fn new(class_id: u32) -> Self {
        Self {
            flags: AtomicU32::new(0),
            class_id: AtomicU32::new(class_id),
        }
    }

    /// Header of a stub
    pub(crate) fn stub(class_id: u32, inherited: u32) -> Self {
        Self {
            flags: AtomicU32::new(STUB_MASK | (inherited & !STUB_MASK)),
            class_id: AtomicU32::new(class_id),
        }
    }

    /// Raw flag word
    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Acquire)
    }

    #[inline]
    pub fn class_id(&self) -> u32 {
        self.class_id.load(Ordering::Relaxed)
    }

    // === Stub / No-swap ===

    /// The one check every field access makes
    #[inline(always)]
    pub fn is_stub(&self) -> bool {
        self.flags.load(Ordering::Acquire) & STUB_MASK != 0
    }

    #[inline]
    pub fn has_no_swap_flag(&self) -> bool {
        self.flags.load(Ordering::Acquire) & NO_SWAP_MASK != 0
    }

    /// Exclude the object from swapping; never cleared
    ///
    /// Returns true if the flag was already set.
    #[inline]
    pub fn set_no_swap_flag(&self) -> bool {
        self.flags.fetch_or(NO_SWAP_MASK, Ordering::AcqRel) & NO_SWAP_MASK != 0
    }

    // === Access Tracking ===

    #[inline]
    fn set_bits(&self, mask: u32) {
        if self.flags.load(Ordering::Relaxed) & mask != mask {
            self.flags.fetch_or(mask, Ordering::AcqRel);
        }
    }

    /// Record a read, unless reads are ignored for this object
    #[inline]
    pub fn note_read(&self) {
        let flags = self.flags.load(Ordering::Relaxed);
        if flags & (READ_MASK | IGNORE_READ_MASK) == 0 {
            self.flags.fetch_or(READ_MASK, Ordering::AcqRel);
        }
    }

    /// Record a write; sets both write and dirty
    #[inline]
    pub fn note_write(&self) {
        self.set_bits(WRITE_MASK | DIRTY_MASK);
    }

    #[inline]
    pub fn read_bit(&self) -> bool {
        self.flags() & READ_MASK != 0
    }

    #[inline]
    pub fn write_bit(&self) -> bool {
        self.flags() & WRITE_MASK != 0
    }

    #[inline]
    pub fn dirty_bit(&self) -> bool {
        self.flags() & DIRTY_MASK != 0
    }

    /// Read/write/dirty bits
    pub fn access_bits(&self) -> u32 {
        self.flags() & ACCESS_MASK
    }

    /// Reset read/write/dirty, e.g. at the start of a sampling interval
    pub fn clear_access_bits(&self) {
        self.flags.fetch_and(!ACCESS_MASK, Ordering::AcqRel);
    }

    /// Set read/write/dirty from a saved copy; other bits of `bits` are ignored
    pub(crate) fn restore_access_bits(&self, bits: u32) {
        self.flags.fetch_or(bits & ACCESS_MASK, Ordering::AcqRel);
    }

    /// Stop recording reads for this object
    pub fn set_ignore_read_flag(&self) {
        self.flags.fetch_or(IGNORE_READ_MASK, Ordering::AcqRel);
    }

    pub fn ignore_read_flag(&self) -> bool {
        self.flags() & IGNORE_READ_MASK != 0
    }

    /// Mirror class id and access bits of `source` into this header
    ///
    /// Stub and no-swap bits of this header are left untouched.
    pub(crate) fn refresh_from(&self, source: &ObjectHeader) {
        let access = source.flags() & (ACCESS_MASK | IGNORE_READ_MASK);
        let _ = self
            .flags
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |flags| {
                let next = (flags & !(ACCESS_MASK | IGNORE_READ_MASK)) | access;
                (next != flags).then_some(next)
            });
        self.class_id.store(source.class_id(), Ordering::Relaxed);
    }
}

impl std::fmt::Debug for ObjectHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHeader")
            .field("flags", &format_args!("{:#08b}", self.flags()))
            .field("class_id", &self.class_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_header() {
        let header = ObjectHeader::new(7);
        assert!(!header.is_stub());
        assert!(!header.has_no_swap_flag());
        assert_eq!(header.class_id(), 7);
        assert_eq!(header.access_bits(), 0);
    }

    #[test]
    fn test_stub_header_inherits_flags() {
        let header = ObjectHeader::stub(3, NO_SWAP_MASK | READ_MASK);
        assert!(header.is_stub());
        assert!(header.has_no_swap_flag());
        assert!(header.read_bit());
    }

    #[test]
    fn test_no_swap_is_sticky() {
        let header = ObjectHeader::new(1);
        assert!(!header.set_no_swap_flag());
        assert!(header.set_no_swap_flag());
        header.clear_access_bits();
        assert!(header.has_no_swap_flag());
    }

    #[test]
    fn test_access_bits() {
        let header = ObjectHeader::new(1);
        header.note_read();
        assert!(header.read_bit());
        assert!(!header.dirty_bit());

        header.note_write();
        assert!(header.write_bit());
        assert!(header.dirty_bit());

        header.clear_access_bits();
        assert_eq!(header.access_bits(), 0);
    }

    #[test]
    fn test_ignore_read() {
        let header = ObjectHeader::new(1);
        header.set_ignore_read_flag();
        header.note_read();
        assert!(!header.read_bit());
        assert!(header.ignore_read_flag());
    }

    #[test]
    fn test_refresh_keeps_stub_bits() {
        let stub = ObjectHeader::stub(0, NO_SWAP_MASK);
        let payload = ObjectHeader::new(42);
        payload.note_write();

        stub.refresh_from(&payload);

        assert!(stub.is_stub());
        assert!(stub.has_no_swap_flag());
        assert!(stub.dirty_bit());
        assert!(!stub.read_bit());
        assert_eq!(stub.class_id(), 42);
    }
}
