//! Native References - Objects Handed Across the Native Boundary
//!
//! Native code holds objects through opaque [`NativeRef`] handles rather
//! than addresses. Any object that gets a global or weak-global handle is
//! flagged no-swap before the handle is returned: native code may read it
//! without going through the stub protocol.
//!
//! Global handles are roots. Weak-global handles are cleared when their
//! object is found dead.

use crate::error::{ReclaimError, Result};
use crate::heap::{Heap, HeapLiveBitmap};
use crate::logging::SwapEvent;
use crate::object::ObjectAddress;
use crate::swap::SwapContext;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of a native handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Global,
    WeakGlobal,
}

impl RefKind {
    fn as_str(self) -> &'static str {
        match self {
            RefKind::Global => "global reference",
            RefKind::WeakGlobal => "weak global reference",
        }
    }
}

/// Opaque handle given to native code
///
/// The low bit encodes the kind; zero is never a valid handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeRef(u64);

impl NativeRef {
    fn new(serial: u64, kind: RefKind) -> Self {
        let tag = match kind {
            RefKind::Global => 0,
            RefKind::WeakGlobal => 1,
        };
        NativeRef((serial << 1) | tag)
    }

    pub fn from_raw(raw: u64) -> Option<Self> {
        (raw != 0).then_some(NativeRef(raw))
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub fn kind(self) -> RefKind {
        if self.0 & 1 == 0 {
            RefKind::Global
        } else {
            RefKind::WeakGlobal
        }
    }
}

impl fmt::Display for NativeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref:{:#x}", self.0)
    }
}

/// Global and weak-global handle table
pub struct NativeRefTable {
    /// Handle -> referent; `None` for a cleared weak handle
    refs: Mutex<IndexMap<NativeRef, Option<ObjectAddress>>>,
    next_serial: AtomicU64,
}

impl NativeRefTable {
    pub fn new() -> Self {
        Self {
            refs: Mutex::new(IndexMap::new()),
            next_serial: AtomicU64::new(1),
        }
    }

    /// Strong handle to `object`; null yields no handle
    pub fn add_global_ref(
        &self,
        heap: &Heap,
        cx: &SwapContext,
        object: Option<ObjectAddress>,
    ) -> Result<Option<NativeRef>> {
        self.add(heap, cx, object, RefKind::Global)
    }

    /// Weak handle to `object`; null yields no handle
    pub fn add_weak_global_ref(
        &self,
        heap: &Heap,
        cx: &SwapContext,
        object: Option<ObjectAddress>,
    ) -> Result<Option<NativeRef>> {
        self.add(heap, cx, object, RefKind::WeakGlobal)
    }

    fn add(
        &self,
        heap: &Heap,
        cx: &SwapContext,
        object: Option<ObjectAddress>,
        kind: RefKind,
    ) -> Result<Option<NativeRef>> {
        let Some(address) = object else {
            return Ok(None);
        };

        let referent = heap.object(address)?;
        if !referent.header().set_no_swap_flag() {
            cx.stats().record_no_swap_mark();
            cx.log(SwapEvent::NoSwapMarked {
                address: address.raw(),
                reason: kind.as_str().to_string(),
            });
        }

        let handle = NativeRef::new(self.next_serial.fetch_add(1, Ordering::Relaxed), kind);
        self.refs.lock().insert(handle, Some(address));
        Ok(Some(handle))
    }

    /// Drop a global handle; false if it was not live
    pub fn delete_global_ref(&self, handle: NativeRef) -> bool {
        self.delete(handle, RefKind::Global)
    }

    /// Drop a weak-global handle; false if it was not live
    pub fn delete_weak_global_ref(&self, handle: NativeRef) -> bool {
        self.delete(handle, RefKind::WeakGlobal)
    }

    fn delete(&self, handle: NativeRef, kind: RefKind) -> bool {
        if handle.kind() != kind {
            log::warn!("{} deleted as a {}", handle, kind.as_str());
            return false;
        }
        self.refs.lock().shift_remove(&handle).is_some()
    }

    /// Referent of `handle`; `None` once a weak handle is cleared
    pub fn decode(&self, handle: NativeRef) -> Result<Option<ObjectAddress>> {
        self.refs
            .lock()
            .get(&handle)
            .copied()
            .ok_or(ReclaimError::InvalidNativeRef(handle.as_raw()))
    }

    /// Referents of every global handle, in creation order
    pub fn global_roots(&self) -> Vec<ObjectAddress> {
        self.refs
            .lock()
            .iter()
            .filter(|(handle, _)| handle.kind() == RefKind::Global)
            .filter_map(|(_, address)| *address)
            .collect()
    }

    /// Clear weak handles whose referent is not marked in `live`
    pub fn sweep_weak(&self, live: &HeapLiveBitmap) -> usize {
        let mut cleared = 0;
        for (handle, referent) in self.refs.lock().iter_mut() {
            if handle.kind() != RefKind::WeakGlobal {
                continue;
            }
            if let Some(address) = *referent {
                if !live.is_marked(address) {
                    *referent = None;
                    cleared += 1;
                }
            }
        }
        cleared
    }

    pub fn len(&self) -> usize {
        self.refs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.lock().is_empty()
    }
}

impl Default for NativeRefTable {
    fn default() -> Self {
        Self::new()
    }
}
