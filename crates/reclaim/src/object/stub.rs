//! Stub - Placeholder for a Swapped Object
//!
//! A stub sits at the address of an object whose payload was written to
//! secondary storage. It carries its own header with the stub bit set, the
//! handle of its reclamation table entry, and a slot that receives the
//! payload on swap-in. Which of stub and payload is authoritative is decided
//! by the entry's resident bit, never by the slot alone.

use super::header::ObjectHeader;
use super::payload::Payload;
use crate::table::EntryHandle;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Lock-free home of a swapped-in payload
///
/// Filled at most once by a compare-and-swap; the loser of a racing install
/// drops its copy. The payload is freed with the slot.
pub struct ResidentSlot {
    ptr: AtomicPtr<Payload>,
}

impl ResidentSlot {
    pub fn empty() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Installed payload, if any
    #[inline]
    pub fn get(&self) -> Option<&Payload> {
        let raw = self.ptr.load(Ordering::Acquire);
        // SAFETY: a non-null pointer came from `Box::into_raw` in `install`
        // and is only reclaimed through `&mut self` (`take`, `drop`), so it
        // is valid for the lifetime of this borrow.
        unsafe { raw.as_ref() }
    }

    /// Install `payload` unless one is already present
    ///
    /// Returns the payload now in the slot and whether it is the one passed in.
    pub fn install(&self, payload: Box<Payload>) -> (&Payload, bool) {
        let raw = Box::into_raw(payload);
        match self
            .ptr
            .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
        {
            // SAFETY: `raw` is now owned by the slot.
            Ok(_) => (unsafe { &*raw }, true),
            Err(existing) => {
                // SAFETY: `raw` was never published; `existing` is owned by
                // the slot as in `get`.
                unsafe {
                    drop(Box::from_raw(raw));
                    (&*existing, false)
                }
            }
        }
    }

    /// Remove the payload
    pub fn take(&mut self) -> Option<Box<Payload>> {
        let raw = std::mem::replace(self.ptr.get_mut(), ptr::null_mut());
        // SAFETY: exclusive access; the pointer came from `Box::into_raw`.
        (!raw.is_null()).then(|| unsafe { Box::from_raw(raw) })
    }

    /// Address of the installed payload, zero if empty
    pub fn address(&self) -> usize {
        self.ptr.load(Ordering::Acquire) as usize
    }
}

impl Drop for ResidentSlot {
    fn drop(&mut self) {
        drop(self.take());
    }
}

impl Default for ResidentSlot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Placeholder object bound to a table entry
pub struct Stub {
    header: ObjectHeader,
    entry: EntryHandle,
    size: usize,
    resident: ResidentSlot,
}

impl Stub {
    /// Stub replacing `payload`, bound to `entry`
    ///
    /// Class id and flags are copied from the payload header.
    pub fn new(entry: EntryHandle, payload: &Payload) -> Self {
        Self {
            header: ObjectHeader::stub(payload.header().class_id(), payload.header().flags()),
            entry,
            size: payload.size(),
            resident: ResidentSlot::empty(),
        }
    }

    #[inline]
    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    #[inline]
    pub fn entry(&self) -> EntryHandle {
        self.entry
    }

    /// Size of the object this stub stands for
    pub fn object_size(&self) -> usize {
        self.size
    }

    pub fn resident_slot(&self) -> &ResidentSlot {
        &self.resident
    }

    /// Mirror class id and access bits of the resident payload
    pub(crate) fn refresh_from(&self, payload: &Payload) {
        self.header.refresh_from(payload.header());
    }
}

impl std::fmt::Debug for Stub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stub")
            .field("header", &self.header)
            .field("entry", &self.entry)
            .field("size", &self.size)
            .field("resident", &format_args!("{:#x}", self.resident.address()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ReferenceMap;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_stub_copies_header() {
        let payload = Payload::new(5, 16, ReferenceMap::empty());
        payload.header().note_write();
        let stub = Stub::new(EntryHandle::from_raw(3), &payload);

        assert!(stub.header().is_stub());
        assert!(stub.header().dirty_bit());
        assert_eq!(stub.header().class_id(), 5);
        assert_eq!(stub.object_size(), payload.size());
        assert!(stub.resident_slot().get().is_none());
        assert_eq!(stub.resident_slot().address(), 0);
    }

    #[test]
    fn test_install_once() {
        let slot = ResidentSlot::empty();
        let (first, installed) = slot.install(Box::new(Payload::new(1, 8, ReferenceMap::empty())));
        assert!(installed);
        let first_addr = first as *const Payload as usize;

        let (second, installed) = slot.install(Box::new(Payload::new(2, 8, ReferenceMap::empty())));
        assert!(!installed);
        assert_eq!(second.header().class_id(), 1);
        assert_eq!(slot.address(), first_addr);
    }

    #[test]
    fn test_take() {
        let mut slot = ResidentSlot::empty();
        slot.install(Box::new(Payload::new(1, 8, ReferenceMap::empty())));
        assert!(slot.take().is_some());
        assert!(slot.take().is_none());
        assert!(slot.get().is_none());
    }

    /// **Invariant verified:** racing installers agree on one payload
    #[test]
    fn test_racing_install() {
        let slot = Arc::new(ResidentSlot::empty());
        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    let (payload, installed) =
                        slot.install(Box::new(Payload::new(i, 8, ReferenceMap::empty())));
                    (payload.header().class_id(), installed)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|(_, installed)| *installed).count(), 1);
        let winner = results[0].0;
        assert!(results.iter().all(|(class, _)| *class == winner));
    }
}
