//! Reclamation Table - Fixed Pool of Swap Metadata
//!
//! One table per runtime. Entries live in a single anonymous mapping of
//! `capacity * size_of::<TableEntry>()` bytes; fresh pages read as zero,
//! which is the free state of an entry.
//!
//! Creation never fails loudly: a table whose mapping could not be made is
//! returned in the invalid state and callers check [`ReclamationTable::is_valid`].
//!
//! The table owns the [`Safepoint`] of the mutators that touch its entries.
//! Operations that need every mutator stopped take a [`PauseGuard`] and
//! refuse one issued by any other safepoint.
//!
//! `create_entry` and `free_entry` are not serialized internally. They are
//! called from one external owner at a time (swap-out under a pause, the
//! free hook under the allocator's ownership of the address). Debug builds
//! assert this.

pub mod entry;

pub use entry::{
    EntryHandle, EntryState, HandshakePhase, HandshakeProbe, NoProbe, TableEntry,
    KERNEL_LOCK_MASK, OCCUPIED_MASK, RESIDENT_MASK,
};

use crate::config::MAX_TABLE_ENTRIES;
use crate::error::{ReclaimError, Result};
use crate::runtime::{PauseGuard, Safepoint};
use memmap2::{MmapMut, MmapOptions};
use std::fmt;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(debug_assertions)]
use std::sync::atomic::AtomicBool;

struct TableMapping {
    // Keeps the entries alive; never touched after construction.
    _mmap: MmapMut,
    base: NonNull<TableEntry>,
}

/// Fixed-capacity array of [`TableEntry`]
pub struct ReclamationTable {
    mapping: Option<TableMapping>,
    num_entries: usize,
    /// Where the next free-slot scan starts
    cursor: AtomicUsize,
    /// Pauses that cover this table's entries
    safepoint: Safepoint,
    #[cfg(debug_assertions)]
    creating: AtomicBool,
}

// SAFETY: entries are only reached through `&TableEntry`, whose fields are
// all atomics. The mapping is owned by the table and unmapped on drop.
unsafe impl Send for ReclamationTable {}
unsafe impl Sync for ReclamationTable {}

impl ReclamationTable {
    /// Create a table with `num_entries` slots
    ///
    /// Returns an invalid table if `num_entries` is zero, too large, or the
    /// backing mapping cannot be created.
    pub fn create_table(num_entries: usize) -> Self {
        let mapping = Self::map_entries(num_entries);
        match &mapping {
            Some(_) => log::debug!(
                "reclamation table created: {} entries, {} bytes",
                num_entries,
                num_entries * std::mem::size_of::<TableEntry>()
            ),
            None => log::error!(
                "reclamation table unavailable: could not back {} entries",
                num_entries
            ),
        }

        Self {
            num_entries: if mapping.is_some() { num_entries } else { 0 },
            mapping,
            cursor: AtomicUsize::new(0),
            safepoint: Safepoint::new(0),
            #[cfg(debug_assertions)]
            creating: AtomicBool::new(false),
        }
    }

    fn map_entries(num_entries: usize) -> Option<TableMapping> {
        if num_entries == 0 || num_entries > MAX_TABLE_ENTRIES {
            return None;
        }
        let bytes = num_entries.checked_mul(std::mem::size_of::<TableEntry>())?;

        let mut mmap = match MmapOptions::new().len(bytes).map_anon() {
            Ok(mmap) => mmap,
            Err(e) => {
                log::error!("failed to map {} bytes for reclamation table: {}", bytes, e);
                return None;
            }
        };

        let base = NonNull::new(mmap.as_mut_ptr().cast::<TableEntry>())?;
        debug_assert_eq!(
            base.as_ptr() as usize % std::mem::align_of::<TableEntry>(),
            0
        );

        Some(TableMapping { _mmap: mmap, base })
    }

    /// Whether the backing storage exists
    pub fn is_valid(&self) -> bool {
        self.mapping.is_some()
    }

    /// Number of slots; zero for an invalid table
    pub fn capacity(&self) -> usize {
        self.num_entries
    }

    /// Bytes of backing storage
    pub fn size_in_bytes(&self) -> usize {
        self.num_entries * std::mem::size_of::<TableEntry>()
    }

    /// All entries, start to end
    pub fn entries(&self) -> &[TableEntry] {
        match &self.mapping {
            // SAFETY: the mapping holds `num_entries` properly aligned
            // entries, zero-initialized, and lives as long as `self`.
            Some(mapping) => unsafe {
                std::slice::from_raw_parts(mapping.base.as_ptr(), self.num_entries)
            },
            None => &[],
        }
    }

    /// First entry of the table
    pub fn begin(&self) -> Option<&TableEntry> {
        self.entries().first()
    }

    /// Last entry of the table
    pub fn last(&self) -> Option<&TableEntry> {
        self.entries().last()
    }

    /// Addresses from the first entry to one past the last
    pub fn entry_range(&self) -> Range<*const TableEntry> {
        self.entries().as_ptr_range()
    }

    /// Safepoint whose pauses stop every mutator of this table
    pub fn safepoint(&self) -> &Safepoint {
        &self.safepoint
    }

    /// Check that `pause` was issued by this table's safepoint
    pub fn check_pause(&self, pause: &PauseGuard<'_>) -> Result<()> {
        if pause.is_for(&self.safepoint) {
            Ok(())
        } else {
            Err(ReclaimError::invalid_state(
                "pause of the table's safepoint",
                "pause of another safepoint",
            ))
        }
    }

    /// Look up the entry named by `handle`
    pub fn entry(&self, handle: EntryHandle) -> Result<&TableEntry> {
        self.entries()
            .get(handle.index())
            .ok_or(ReclaimError::InvalidEntry {
                index: handle.index(),
                capacity: self.num_entries,
            })
    }

    /// Iterate over every slot with its handle
    pub fn iter(&self) -> impl Iterator<Item = (EntryHandle, &TableEntry)> {
        self.entries()
            .iter()
            .enumerate()
            .map(|(index, entry)| (EntryHandle::new(index), entry))
    }

    /// Number of occupied slots
    pub fn occupied_count(&self) -> usize {
        self.entries().iter().filter(|e| e.occupied_bit()).count()
    }

    /// Claim a free slot
    ///
    /// The returned entry is occupied, not resident, unlocked, with a zero
    /// counter, page count and address.
    pub fn create_entry(&self) -> Result<EntryHandle> {
        if !self.is_valid() {
            return Err(ReclaimError::TableUnavailable(
                "create_entry on a table without backing storage".to_string(),
            ));
        }

        #[cfg(debug_assertions)]
        let _owner = SingleOwner::enter(&self.creating);

        let entries = self.entries();
        let n = entries.len();
        let start = self.cursor.load(Ordering::Relaxed) % n;

        for step in 0..n {
            let index = (start + step) % n;
            let entry = &entries[index];
            if !entry.occupied_bit() {
                entry.reset();
                entry.set_occupied_bit();
                self.cursor.store((index + 1) % n, Ordering::Relaxed);
                return Ok(EntryHandle::new(index));
            }
        }

        Err(ReclaimError::TableFull { capacity: n })
    }

    /// Return a slot to the free state
    pub fn free_entry(&self, handle: EntryHandle) -> Result<()> {
        #[cfg(debug_assertions)]
        let _owner = SingleOwner::enter(&self.creating);

        let entry = self.entry(handle)?;
        debug_assert!(
            entry.occupied_bit(),
            "double free of reclamation table entry {}",
            handle
        );
        entry.reset();
        Ok(())
    }

    /// Clear every kernel lock and app counter
    ///
    /// Recovery after a pause; the guard proves no mutator is inside a
    /// handshake. Returns how many entries had lock state to clear.
    pub fn unlock_all_entries(&self, pause: &PauseGuard<'_>) -> Result<usize> {
        self.check_pause(pause)?;
        let cleared = self
            .entries()
            .iter()
            .filter(|entry| entry.clear_locks())
            .count();
        log::debug!(
            "unlock_all_entries: cleared lock state on {} of {} entries",
            cleared,
            self.num_entries
        );
        Ok(cleared)
    }

    /// Log every occupied entry at debug level
    pub fn dump(&self) {
        log::debug!(
            "reclamation table: {} entries, {} occupied",
            self.num_entries,
            self.occupied_count()
        );
        for (handle, entry) in self.iter().filter(|(_, e)| e.occupied_bit()) {
            log::debug!("  {} {:?}", handle, entry);
        }
    }
}

impl fmt::Debug for ReclamationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReclamationTable")
            .field("valid", &self.is_valid())
            .field("capacity", &self.num_entries)
            .field("occupied", &self.occupied_count())
            .finish()
    }
}

/// Debug-only check that create/free have a single caller at a time
#[cfg(debug_assertions)]
struct SingleOwner<'a>(&'a AtomicBool);

#[cfg(debug_assertions)]
impl<'a> SingleOwner<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        assert!(
            !flag.swap(true, Ordering::Acquire),
            "reclamation table entries created or freed concurrently"
        );
        SingleOwner(flag)
    }
}

#[cfg(debug_assertions)]
impl Drop for SingleOwner<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
