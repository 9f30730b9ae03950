//! Heap Module - Spaces and the Free Notification Boundary
//!
//! ```text
//! Heap
//! ├── main space    (objects below large_object_threshold, sweep only)
//! └── large space   (page-aligned, individual free + sweep)
//! ```
//!
//! Every path that releases an object calls the [`FreeHook`] first, so
//! swap metadata bound to the address is gone before the address can be
//! handed out again.
//!
//! While the heap is in [`HeapMode::Zygote`] (building the image shared by
//! forked processes) every large object is created with the no-swap flag.

pub mod bitmap;
pub mod space;

pub use bitmap::LiveBitmap;
pub use space::{ObjectSpace, SpaceKind, SweepStats};

use crate::config::SwapConfig;
use crate::error::{ReclaimError, Result};
use crate::object::{HeapObject, ObjectAddress, Payload, ReferenceMap};
use crate::util::page::align_to_page;
use crate::util::{get_page_size, Alignment, ThreadId};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// First address of the main space
const HEAP_BASE: usize = 0x1000_0000;

/// Deallocation notification
///
/// Called synchronously, once per released object, before its memory is
/// reusable.
pub trait FreeHook: Send + Sync {
    fn record_free(&self, thread: ThreadId, address: ObjectAddress);
}

/// Hook for heaps without swapping
pub struct NoFreeHook;

impl FreeHook for NoFreeHook {
    fn record_free(&self, _thread: ThreadId, _address: ObjectAddress) {}
}

/// Allocation mode of the heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeapMode {
    Normal = 0,
    /// Pre-fork image construction
    Zygote = 1,
}

/// Liveness bitmaps for both spaces
pub struct HeapLiveBitmap {
    main: LiveBitmap,
    large: LiveBitmap,
}

impl HeapLiveBitmap {
    /// Mark `address`; returns true if newly marked
    pub fn mark(&self, address: ObjectAddress) -> bool {
        let raw = address.raw();
        if self.main.covers(raw) {
            self.main.mark(raw)
        } else {
            self.large.mark(raw)
        }
    }

    pub fn is_marked(&self, address: ObjectAddress) -> bool {
        self.main.is_marked(address.raw()) || self.large.is_marked(address.raw())
    }

    pub fn count_marked(&self) -> usize {
        self.main.count_marked() + self.large.count_marked()
    }
}

/// Managed heap
pub struct Heap {
    main: ObjectSpace,
    large: ObjectSpace,
    large_object_threshold: usize,
    mode: AtomicU8,
    free_hook: Arc<dyn FreeHook>,
}

impl Heap {
    /// Heap sized from `config`, reporting frees to `free_hook`
    pub fn new(config: &SwapConfig, free_hook: Arc<dyn FreeHook>) -> Self {
        let page = get_page_size();
        let main_capacity = Alignment::align_up(config.main_space_bytes, Alignment::OBJECT);
        let large_base = align_to_page(HEAP_BASE + main_capacity);
        let large_capacity = align_to_page(config.large_space_bytes);

        Self {
            main: ObjectSpace::new(SpaceKind::Main, HEAP_BASE, main_capacity, Alignment::OBJECT),
            large: ObjectSpace::new(SpaceKind::Large, large_base, large_capacity, page),
            large_object_threshold: config.large_object_threshold,
            mode: AtomicU8::new(HeapMode::Normal as u8),
            free_hook,
        }
    }

    pub fn mode(&self) -> HeapMode {
        match self.mode.load(Ordering::Acquire) {
            1 => HeapMode::Zygote,
            _ => HeapMode::Normal,
        }
    }

    pub fn set_mode(&self, mode: HeapMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    /// Allocate a zeroed object
    pub fn allocate(
        &self,
        class_id: u32,
        field_bytes: usize,
        references: ReferenceMap,
    ) -> Result<ObjectAddress> {
        let payload = Payload::new(class_id, field_bytes, references);
        if payload.size() < self.large_object_threshold {
            return self.main.allocate(HeapObject::new(payload));
        }

        if self.mode() == HeapMode::Zygote {
            payload.header().set_no_swap_flag();
        }
        let address = self.large.allocate(HeapObject::new(payload))?;
        if self.mode() == HeapMode::Zygote {
            log::debug!("zygote large object {} excluded from swapping", address);
        }
        Ok(address)
    }

    /// Object at `address`
    pub fn get(&self, address: ObjectAddress) -> Option<Arc<HeapObject>> {
        self.space_for(address)?.get(address)
    }

    /// Object at `address`, or `InvalidAddress`
    pub fn object(&self, address: ObjectAddress) -> Result<Arc<HeapObject>> {
        self.get(address).ok_or(ReclaimError::InvalidAddress {
            address: address.raw(),
        })
    }

    pub fn contains(&self, address: ObjectAddress) -> bool {
        self.get(address).is_some()
    }

    /// Space whose range includes `address`
    pub fn space_kind(&self, address: ObjectAddress) -> Option<SpaceKind> {
        self.space_for(address).map(ObjectSpace::kind)
    }

    fn space_for(&self, address: ObjectAddress) -> Option<&ObjectSpace> {
        if self.main.contains(address) {
            Some(&self.main)
        } else if self.large.contains(address) {
            Some(&self.large)
        } else {
            None
        }
    }

    /// Release one large object
    pub fn free_large_object(&self, thread: ThreadId, address: ObjectAddress) -> Result<usize> {
        if !self.large.contains(address) {
            return Err(ReclaimError::invalid_state(
                "large object address",
                format!("{} outside the large object space", address),
            ));
        }
        self.large.free(thread, address, self.free_hook.as_ref())
    }

    /// Empty bitmaps for a marking pass
    pub fn new_live_bitmap(&self) -> HeapLiveBitmap {
        HeapLiveBitmap {
            main: self.main.new_live_bitmap(),
            large: self.large.new_live_bitmap(),
        }
    }

    /// Release every unmarked object of both spaces
    pub fn sweep(&self, thread: ThreadId, live: &HeapLiveBitmap) -> SweepStats {
        let mut stats = self.main.sweep(thread, &live.main, self.free_hook.as_ref());
        stats += self.large.sweep(thread, &live.large, self.free_hook.as_ref());
        stats
    }

    pub fn main_space(&self) -> &ObjectSpace {
        &self.main
    }

    pub fn large_space(&self) -> &ObjectSpace {
        &self.large
    }

    pub fn large_object_threshold(&self) -> usize {
        self.large_object_threshold
    }

    pub fn object_count(&self) -> usize {
        self.main.object_count() + self.large.object_count()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.main.bytes_allocated() + self.large.bytes_allocated()
    }
}
