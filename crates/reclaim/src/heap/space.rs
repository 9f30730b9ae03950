//! Object Space - Address Range with Region Reuse
//!
//! A space hands out addresses from a fixed range, bump-allocating fresh
//! regions and reusing freed ones (best fit by size). Objects are kept in
//! an address map.
//!
//! Two spaces exist per heap:
//! - Main: small objects, 16-byte aligned, released only by sweep
//! - Large: page-aligned regions, released individually or by sweep
//!
//! Whatever releases an object, the free hook runs after the object is
//! unmapped and before its region is back in the free list, so no other
//! object can occupy the address while swap metadata still names it.

use super::bitmap::LiveBitmap;
use super::FreeHook;
use crate::error::{ReclaimError, Result};
use crate::object::{HeapObject, ObjectAddress};
use crate::util::{Alignment, ThreadId};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Which space an object lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceKind {
    Main,
    Large,
}

struct Slot {
    object: Arc<HeapObject>,
    /// Bytes of the region holding the object
    region: usize,
}

/// Bytes and objects released by a sweep or free
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub objects_freed: usize,
    pub bytes_freed: usize,
}

impl std::ops::AddAssign for SweepStats {
    fn add_assign(&mut self, other: Self) {
        self.objects_freed += other.objects_freed;
        self.bytes_freed += other.bytes_freed;
    }
}

/// One address range of the heap
pub struct ObjectSpace {
    kind: SpaceKind,
    base: usize,
    capacity: usize,
    alignment: usize,

    objects: RwLock<FxHashMap<ObjectAddress, Slot>>,

    /// Free regions: size -> addresses
    free_regions: Mutex<BTreeMap<usize, Vec<usize>>>,

    /// Offset of the first never-used byte
    cursor: AtomicUsize,

    /// Bytes in live regions
    bytes_allocated: AtomicUsize,
}

impl ObjectSpace {
    pub fn new(kind: SpaceKind, base: usize, capacity: usize, alignment: usize) -> Self {
        debug_assert!(base != 0 && Alignment::is_aligned(base, alignment));
        Self {
            kind,
            base,
            capacity,
            alignment,
            objects: RwLock::new(FxHashMap::default()),
            free_regions: Mutex::new(BTreeMap::new()),
            cursor: AtomicUsize::new(0),
            bytes_allocated: AtomicUsize::new(0),
        }
    }

    pub fn kind(&self) -> SpaceKind {
        self.kind
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, address: ObjectAddress) -> bool {
        let raw = address.raw();
        raw >= self.base && raw - self.base < self.capacity
    }

    /// Place `object` in a region of at least its size
    pub fn allocate(&self, object: HeapObject) -> Result<ObjectAddress> {
        let size = Alignment::align_up(object.allocation_size(), self.alignment);
        let (raw, region) = self.find_or_create_region(size)?;
        let address = ObjectAddress::new(raw).ok_or_else(|| {
            ReclaimError::Internal(format!("{:?} space produced a null address", self.kind))
        })?;

        self.objects.write().insert(
            address,
            Slot {
                object: Arc::new(object),
                region,
            },
        );
        self.bytes_allocated.fetch_add(region, Ordering::Relaxed);
        Ok(address)
    }

    fn find_or_create_region(&self, size: usize) -> Result<(usize, usize)> {
        {
            let mut free_regions = self.free_regions.lock();
            let reusable = free_regions.range(size..).next().map(|(&region, _)| region);
            if let Some(region) = reusable {
                if let Some(addresses) = free_regions.get_mut(&region) {
                    if let Some(address) = addresses.pop() {
                        if addresses.is_empty() {
                            free_regions.remove(&region);
                        }
                        return Ok((address, region));
                    }
                }
            }
        }

        let offset = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cursor| {
                cursor
                    .checked_add(size)
                    .filter(|&end| end <= self.capacity)
            })
            .map_err(|cursor| ReclaimError::OutOfMemory {
                requested: size,
                available: self.capacity.saturating_sub(cursor),
            })?;
        Ok((self.base + offset, size))
    }

    pub fn get(&self, address: ObjectAddress) -> Option<Arc<HeapObject>> {
        self.objects.read().get(&address).map(|slot| Arc::clone(&slot.object))
    }

    /// Release one object
    pub fn free(&self, thread: ThreadId, address: ObjectAddress, hook: &dyn FreeHook) -> Result<usize> {
        let slot = self
            .objects
            .write()
            .remove(&address)
            .ok_or(ReclaimError::InvalidAddress {
                address: address.raw(),
            })?;
        hook.record_free(thread, address);
        self.release_region(address, slot.region);
        Ok(slot.region)
    }

    /// Release every object whose bit in `live` is clear
    pub fn sweep(&self, thread: ThreadId, live: &LiveBitmap, hook: &dyn FreeHook) -> SweepStats {
        let dead: Vec<(ObjectAddress, usize)> = {
            let mut objects = self.objects.write();
            let addresses: Vec<ObjectAddress> = objects
                .keys()
                .filter(|address| !live.is_marked(address.raw()))
                .copied()
                .collect();
            addresses
                .into_iter()
                .filter_map(|address| objects.remove(&address).map(|slot| (address, slot.region)))
                .collect()
        };

        let mut stats = SweepStats::default();
        for (address, region) in dead {
            hook.record_free(thread, address);
            self.release_region(address, region);
            stats.objects_freed += 1;
            stats.bytes_freed += region;
        }
        stats
    }

    fn release_region(&self, address: ObjectAddress, region: usize) {
        self.free_regions
            .lock()
            .entry(region)
            .or_default()
            .push(address.raw());
        self.bytes_allocated.fetch_sub(region, Ordering::Relaxed);
    }

    /// Empty bitmap covering this space
    pub fn new_live_bitmap(&self) -> LiveBitmap {
        LiveBitmap::new(self.base, self.capacity, self.alignment)
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.load(Ordering::Relaxed)
    }

    pub fn addresses(&self) -> Vec<ObjectAddress> {
        let mut addresses: Vec<_> = self.objects.read().keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }

    /// Free regions and their total bytes
    pub fn free_region_stats(&self) -> (usize, usize) {
        let free_regions = self.free_regions.lock();
        let count = free_regions.values().map(Vec::len).sum();
        let bytes = free_regions
            .iter()
            .map(|(&size, addresses)| size * addresses.len())
            .sum();
        (count, bytes)
    }
}
