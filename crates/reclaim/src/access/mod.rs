//! Access Module - Stub-Aware Field Accessors
//!
//! Every field accessor and the reference visitor resolve the object once
//! per access (the resolved variant always agrees with the header stub bit):
//!
//! ```text
//! Direct  → access the payload in place
//! Stub    → StubAccess::lock      (app-thread handshake on the entry)
//!         → ensure_resident       (swap in if the resident bit is clear)
//!         → access the payload
//!         → refresh stub header   (class id, access bits)
//!         → unlock                (on drop, error paths included)
//! ```
//!
//! Volatile accessors use sequentially consistent ordering; plain ones use
//! relaxed ordering. Reference stores run the context's write barrier after
//! the store has landed in the resident payload.

use crate::error::Result;
use crate::logging::SwapEvent;
use crate::object::{FieldOffset, HeapObject, ObjectAddress, ObjectRef, Payload, Primitive, Stub};
use crate::swap::SwapContext;
use crate::table::{EntryHandle, HandshakePhase, HandshakeProbe, TableEntry};

/// Probe warning once when a handshake keeps seeing the kernel lock
struct StallWatch<'a> {
    cx: &'a SwapContext,
    entry: EntryHandle,
    locked_polls: u64,
    warned: bool,
}

impl<'a> StallWatch<'a> {
    fn new(cx: &'a SwapContext, entry: EntryHandle) -> Self {
        Self {
            cx,
            entry,
            locked_polls: 0,
            warned: false,
        }
    }
}

impl HandshakeProbe for StallWatch<'_> {
    #[inline]
    fn on_poll(&mut self, _phase: HandshakePhase, kernel_locked: bool) {
        if !kernel_locked || self.warned {
            return;
        }
        self.locked_polls += 1;
        let threshold = self.cx.config().stall_warn_polls;
        if threshold != 0 && self.locked_polls >= threshold {
            self.warned = true;
            log::warn!(
                "entry {} kernel lock held for {} polls; mutator still spinning",
                self.entry,
                self.locked_polls
            );
            self.cx.log(SwapEvent::HandshakeStall {
                entry: self.entry.as_u32(),
                polls: self.locked_polls,
            });
        }
    }
}

/// App-thread hold on a stub's entry
///
/// Acquired with the handshake; released with one counter decrement on drop.
pub struct StubAccess<'a> {
    entry: &'a TableEntry,
}

impl<'a> StubAccess<'a> {
    /// Run the handshake on the entry of `stub`
    pub fn lock(cx: &'a SwapContext, stub: &Stub) -> Result<Self> {
        let entry = cx.stub_entry(stub)?;
        let mut watch = StallWatch::new(cx, stub.entry());
        let polls = entry.lock_from_app_thread_observed(&mut watch);
        cx.stats().record_handshake(polls);
        Ok(Self { entry })
    }

    pub fn entry(&self) -> &TableEntry {
        self.entry
    }
}

impl Drop for StubAccess<'_> {
    fn drop(&mut self) {
        self.entry.unlock_from_app_thread();
    }
}

/// Run `op` on the payload behind `object`
#[inline(always)]
fn with_payload<R>(
    object: &HeapObject,
    cx: &SwapContext,
    op: impl FnOnce(&Payload) -> Result<R>,
) -> Result<R> {
    match object.resolve() {
        ObjectRef::Direct(payload) => op(payload),
        ObjectRef::Indirect(stub) => redirect(cx, stub, op),
    }
}

#[cold]
#[inline(never)]
fn redirect<R>(cx: &SwapContext, stub: &Stub, op: impl FnOnce(&Payload) -> Result<R>) -> Result<R> {
    debug_assert!(stub.header().is_stub());
    cx.stats().record_stub_access();

    let access = StubAccess::lock(cx, stub)?;
    let payload = cx.ensure_resident(stub, access.entry())?;
    let result = op(payload);
    stub.refresh_from(payload);
    result
}

macro_rules! primitive_accessors {
    ($($ty:ty => $get:ident, $get_volatile:ident, $set:ident, $set_volatile:ident;)*) => {
        impl HeapObject {
            $(
                #[inline]
                pub fn $get(&self, cx: &SwapContext, offset: FieldOffset) -> Result<$ty> {
                    self.load_field::<$ty>(cx, offset, false)
                }

                #[inline]
                pub fn $get_volatile(&self, cx: &SwapContext, offset: FieldOffset) -> Result<$ty> {
                    self.load_field::<$ty>(cx, offset, true)
                }

                #[inline]
                pub fn $set(&self, cx: &SwapContext, offset: FieldOffset, value: $ty) -> Result<()> {
                    self.store_field::<$ty>(cx, offset, value, false)
                }

                #[inline]
                pub fn $set_volatile(&self, cx: &SwapContext, offset: FieldOffset, value: $ty) -> Result<()> {
                    self.store_field::<$ty>(cx, offset, value, true)
                }
            )*
        }
    };
}

primitive_accessors! {
    i8 => get_field_byte, get_field_byte_volatile, set_field_byte, set_field_byte_volatile;
    u16 => get_field_char, get_field_char_volatile, set_field_char, set_field_char_volatile;
    i16 => get_field_short, get_field_short_volatile, set_field_short, set_field_short_volatile;
    i32 => get_field_32, get_field_32_volatile, set_field_32, set_field_32_volatile;
    i64 => get_field_64, get_field_64_volatile, set_field_64, set_field_64_volatile;
    f32 => get_field_f32, get_field_f32_volatile, set_field_f32, set_field_f32_volatile;
    f64 => get_field_f64, get_field_f64_volatile, set_field_f64, set_field_f64_volatile;
}

impl HeapObject {
    fn load_field<T: Primitive>(&self, cx: &SwapContext, offset: FieldOffset, volatile: bool) -> Result<T> {
        with_payload(self, cx, |payload| {
            let value = payload.fields().load::<T>(offset, volatile)?;
            payload.header().note_read();
            Ok(value)
        })
    }

    fn store_field<T: Primitive>(
        &self,
        cx: &SwapContext,
        offset: FieldOffset,
        value: T,
        volatile: bool,
    ) -> Result<()> {
        with_payload(self, cx, |payload| {
            payload.fields().store(offset, value, volatile)?;
            payload.header().note_write();
            Ok(())
        })
    }

    // === Boolean (one byte, nonzero is true) ===

    pub fn get_field_boolean(&self, cx: &SwapContext, offset: FieldOffset) -> Result<bool> {
        Ok(self.load_field::<u8>(cx, offset, false)? != 0)
    }

    pub fn get_field_boolean_volatile(&self, cx: &SwapContext, offset: FieldOffset) -> Result<bool> {
        Ok(self.load_field::<u8>(cx, offset, true)? != 0)
    }

    pub fn set_field_boolean(&self, cx: &SwapContext, offset: FieldOffset, value: bool) -> Result<()> {
        self.store_field::<u8>(cx, offset, value as u8, false)
    }

    pub fn set_field_boolean_volatile(&self, cx: &SwapContext, offset: FieldOffset, value: bool) -> Result<()> {
        self.store_field::<u8>(cx, offset, value as u8, true)
    }

    // === 64-bit compare-and-set ===

    /// Compare-and-set a 64-bit field; may fail spuriously
    pub fn cas_field_i64_weak(&self, cx: &SwapContext, offset: FieldOffset, expected: i64, new: i64) -> Result<bool> {
        self.cas_word(cx, offset, expected as u64, new as u64, true)
    }

    /// Compare-and-set a 64-bit field
    pub fn cas_field_i64_strong(&self, cx: &SwapContext, offset: FieldOffset, expected: i64, new: i64) -> Result<bool> {
        self.cas_word(cx, offset, expected as u64, new as u64, false)
    }

    fn cas_word(&self, cx: &SwapContext, offset: FieldOffset, expected: u64, new: u64, weak: bool) -> Result<bool> {
        with_payload(self, cx, |payload| {
            let swapped = payload.fields().compare_exchange(offset, expected, new, weak)?;
            if swapped {
                payload.header().note_write();
            } else {
                payload.header().note_read();
            }
            Ok(swapped)
        })
    }

    // === References ===

    pub fn get_field_object(&self, cx: &SwapContext, offset: FieldOffset) -> Result<Option<ObjectAddress>> {
        self.load_reference(cx, offset, false)
    }

    pub fn get_field_object_volatile(&self, cx: &SwapContext, offset: FieldOffset) -> Result<Option<ObjectAddress>> {
        self.load_reference(cx, offset, true)
    }

    fn load_reference(&self, cx: &SwapContext, offset: FieldOffset, volatile: bool) -> Result<Option<ObjectAddress>> {
        Ok(ObjectAddress::decode(self.load_field::<u64>(cx, offset, volatile)?))
    }

    /// Store a reference without notifying the collector
    pub fn set_field_object_without_write_barrier(
        &self,
        cx: &SwapContext,
        offset: FieldOffset,
        value: Option<ObjectAddress>,
    ) -> Result<()> {
        self.store_field::<u64>(cx, offset, ObjectAddress::encode(value), false)
    }

    pub fn set_field_object_without_write_barrier_volatile(
        &self,
        cx: &SwapContext,
        offset: FieldOffset,
        value: Option<ObjectAddress>,
    ) -> Result<()> {
        self.store_field::<u64>(cx, offset, ObjectAddress::encode(value), true)
    }

    /// Store a reference, then run the write barrier
    pub fn set_field_object(&self, cx: &SwapContext, offset: FieldOffset, value: Option<ObjectAddress>) -> Result<()> {
        self.set_field_object_without_write_barrier(cx, offset, value)?;
        self.run_write_barrier(cx, offset, value);
        Ok(())
    }

    pub fn set_field_object_volatile(
        &self,
        cx: &SwapContext,
        offset: FieldOffset,
        value: Option<ObjectAddress>,
    ) -> Result<()> {
        self.set_field_object_without_write_barrier_volatile(cx, offset, value)?;
        self.run_write_barrier(cx, offset, value);
        Ok(())
    }

    /// Compare-and-set a reference field; the barrier runs on success
    pub fn cas_field_object(
        &self,
        cx: &SwapContext,
        offset: FieldOffset,
        expected: Option<ObjectAddress>,
        new: Option<ObjectAddress>,
    ) -> Result<bool> {
        let swapped = self.cas_word(
            cx,
            offset,
            ObjectAddress::encode(expected),
            ObjectAddress::encode(new),
            false,
        )?;
        if swapped {
            self.run_write_barrier(cx, offset, new);
        }
        Ok(swapped)
    }

    /// Replace a reference field, returning the previous value
    pub fn exchange_field_object(
        &self,
        cx: &SwapContext,
        offset: FieldOffset,
        new: Option<ObjectAddress>,
    ) -> Result<Option<ObjectAddress>> {
        let previous = with_payload(self, cx, |payload| {
            let old = payload.fields().swap(offset, ObjectAddress::encode(new))?;
            payload.header().note_write();
            Ok(ObjectAddress::decode(old))
        })?;
        self.run_write_barrier(cx, offset, new);
        Ok(previous)
    }

    #[inline]
    fn run_write_barrier(&self, cx: &SwapContext, offset: FieldOffset, value: Option<ObjectAddress>) {
        if let Some(value) = value {
            cx.write_barrier().on_reference_store(self, offset, value);
        }
    }

    // === Whole-object operations ===

    /// Object size in bytes, header included
    pub fn size_of(&self, cx: &SwapContext) -> Result<usize> {
        with_payload(self, cx, |payload| Ok(payload.size()))
    }

    /// Call `visitor` with every reference field and its current value
    ///
    /// Used by the collector; does not touch the access bits.
    pub fn visit_references<F>(&self, cx: &SwapContext, mut visitor: F) -> Result<()>
    where
        F: FnMut(FieldOffset, Option<ObjectAddress>),
    {
        with_payload(self, cx, |payload| {
            for offset in payload.references().offsets() {
                let word = payload.fields().load::<u64>(offset, false)?;
                visitor(offset, ObjectAddress::decode(word));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwapConfig;
    use crate::error::ReclaimError;
    use crate::heap::Heap;
    use crate::object::ReferenceMap;
    use crate::swap::MemoryBackend;
    use crate::table::ReclamationTable;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn context(config: SwapConfig) -> (Arc<SwapContext>, Heap) {
        let table = Arc::new(ReclamationTable::create_table(config.table_entries));
        let cx = Arc::new(
            SwapContext::new(config.clone(), table, Arc::new(MemoryBackend::new())).unwrap(),
        );
        let heap = Heap::new(&config, cx.clone());
        (cx, heap)
    }

    fn small_config() -> SwapConfig {
        SwapConfig {
            table_entries: 16,
            main_space_bytes: 1 << 16,
            large_space_bytes: 1 << 20,
            ..Default::default()
        }
    }

    fn swap_out(cx: &SwapContext, heap: &Heap, address: ObjectAddress) {
        cx.swap_out(heap, address, &cx.pause()).unwrap();
    }

    #[test]
    fn test_direct_access_skips_table() {
        let (cx, heap) = context(small_config());
        let address = heap.allocate(1, 16, ReferenceMap::empty()).unwrap();
        let object = heap.object(address).unwrap();

        object.set_field_32(&cx, FieldOffset::new(4), -5).unwrap();
        assert_eq!(object.get_field_32(&cx, FieldOffset::new(4)).unwrap(), -5);
        assert_eq!(cx.stats().stub_accesses(), 0);
        assert!(object.header().dirty_bit());
    }

    /// **Invariant verified:** a set/get pair through a stub round-trips and
    /// leaves the entry resident
    #[test]
    fn test_stub_set_get_round_trip() {
        let (cx, heap) = context(small_config());
        let address = heap.allocate(1, 16, ReferenceMap::empty()).unwrap();
        swap_out(&cx, &heap, address);
        let object = heap.object(address).unwrap();
        let stub = object.as_stub().unwrap();
        let entry = cx.stub_entry(stub).unwrap();
        assert!(!entry.resident_bit());

        object.set_field_64(&cx, FieldOffset::new(8), 0x1234_5678).unwrap();
        assert_eq!(object.get_field_64(&cx, FieldOffset::new(8)).unwrap(), 0x1234_5678);

        assert!(entry.resident_bit());
        assert_eq!(entry.object_address(), stub.resident_slot().address());
        assert_eq!(cx.stats().swap_ins(), 1);
        assert_eq!(cx.stats().stub_accesses(), 2);
    }

    #[test]
    fn test_every_width_through_stub() {
        let (cx, heap) = context(small_config());
        let address = heap.allocate(1, 48, ReferenceMap::empty()).unwrap();
        swap_out(&cx, &heap, address);
        let object = heap.object(address).unwrap();

        object.set_field_boolean(&cx, FieldOffset::new(0), true).unwrap();
        object.set_field_byte(&cx, FieldOffset::new(1), -3).unwrap();
        object.set_field_char(&cx, FieldOffset::new(2), 0x263a).unwrap();
        object.set_field_short_volatile(&cx, FieldOffset::new(4), -1200).unwrap();
        object.set_field_32_volatile(&cx, FieldOffset::new(8), i32::MIN).unwrap();
        object.set_field_f32(&cx, FieldOffset::new(12), 1.5).unwrap();
        object.set_field_64_volatile(&cx, FieldOffset::new(16), i64::MAX).unwrap();
        object.set_field_f64_volatile(&cx, FieldOffset::new(24), -0.25).unwrap();

        assert!(object.get_field_boolean_volatile(&cx, FieldOffset::new(0)).unwrap());
        assert_eq!(object.get_field_byte_volatile(&cx, FieldOffset::new(1)).unwrap(), -3);
        assert_eq!(object.get_field_char_volatile(&cx, FieldOffset::new(2)).unwrap(), 0x263a);
        assert_eq!(object.get_field_short(&cx, FieldOffset::new(4)).unwrap(), -1200);
        assert_eq!(object.get_field_32(&cx, FieldOffset::new(8)).unwrap(), i32::MIN);
        assert_eq!(object.get_field_f32_volatile(&cx, FieldOffset::new(12)).unwrap(), 1.5);
        assert_eq!(object.get_field_64(&cx, FieldOffset::new(16)).unwrap(), i64::MAX);
        assert_eq!(object.get_field_f64(&cx, FieldOffset::new(24)).unwrap(), -0.25);
        assert!(!object.get_field_boolean(&cx, FieldOffset::new(32)).unwrap());
    }

    #[test]
    fn test_handshake_counter_net_increment() {
        let (cx, heap) = context(small_config());
        let address = heap.allocate(1, 8, ReferenceMap::empty()).unwrap();
        swap_out(&cx, &heap, address);
        let object = heap.object(address).unwrap();
        let entry = cx.stub_entry(object.as_stub().unwrap()).unwrap();

        object.get_field_64(&cx, FieldOffset::new(0)).unwrap();
        assert_eq!(entry.app_lock_counter(), 1);
        object.get_field_64(&cx, FieldOffset::new(0)).unwrap();
        assert_eq!(entry.app_lock_counter(), 2);
    }

    #[test]
    fn test_field_errors_release_handshake() {
        let (cx, heap) = context(small_config());
        let address = heap.allocate(1, 8, ReferenceMap::empty()).unwrap();
        swap_out(&cx, &heap, address);
        let object = heap.object(address).unwrap();

        assert!(matches!(
            object.get_field_64(&cx, FieldOffset::new(64)),
            Err(ReclaimError::FieldOutOfBounds { .. })
        ));
        assert!(matches!(
            object.get_field_32(&cx, FieldOffset::new(2)),
            Err(ReclaimError::MisalignedField { .. })
        ));
        let entry = cx.stub_entry(object.as_stub().unwrap()).unwrap();
        assert_eq!(entry.app_lock_counter(), 2);
    }

    #[test]
    fn test_swap_in_failure_propagates() {
        let (cx, heap) = context(small_config());
        let address = heap.allocate(1, 8, ReferenceMap::empty()).unwrap();
        swap_out(&cx, &heap, address);
        let object = heap.object(address).unwrap();
        let stub = object.as_stub().unwrap();
        cx.backend().discard(stub.entry());

        let result = object.get_field_64(&cx, FieldOffset::new(0));
        assert!(matches!(result, Err(ReclaimError::SwapInFailed { .. })));

        let entry = cx.stub_entry(stub).unwrap();
        assert!(!entry.resident_bit());
        assert_eq!(entry.app_lock_counter(), 1);
        assert_eq!(cx.stats().swap_in_failures(), 1);
    }

    #[test]
    fn test_cas_i64() {
        let (cx, heap) = context(small_config());
        let address = heap.allocate(1, 8, ReferenceMap::empty()).unwrap();
        swap_out(&cx, &heap, address);
        let object = heap.object(address).unwrap();
        let offset = FieldOffset::new(0);

        assert!(object.cas_field_i64_strong(&cx, offset, 0, 10).unwrap());
        assert!(!object.cas_field_i64_strong(&cx, offset, 0, 20).unwrap());
        while !object.cas_field_i64_weak(&cx, offset, 10, 30).unwrap() {}
        assert_eq!(object.get_field_64(&cx, offset).unwrap(), 30);
    }

    #[test]
    fn test_reference_store_runs_barrier_after_store() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        let barrier = move |holder: &HeapObject, offset: FieldOffset, value: ObjectAddress| {
            let stored = match holder.resolve() {
                ObjectRef::Direct(payload) => payload.fields().load::<u64>(offset, true),
                ObjectRef::Indirect(stub) => stub
                    .resident_slot()
                    .get()
                    .map_or(Ok(0), |payload| payload.fields().load::<u64>(offset, true)),
            };
            recorded.lock().push((offset, value, stored.unwrap()));
        };

        let config = small_config();
        let table = Arc::new(ReclamationTable::create_table(config.table_entries));
        let cx = Arc::new(
            SwapContext::new(config.clone(), table, Arc::new(MemoryBackend::new()))
                .unwrap()
                .with_write_barrier(Arc::new(barrier)),
        );
        let heap = Heap::new(&config, cx.clone());

        let holder = heap.allocate(1, 16, ReferenceMap::new(vec![0, 1])).unwrap();
        let target = heap.allocate(2, 8, ReferenceMap::empty()).unwrap();
        swap_out(&cx, &heap, holder);
        let object = heap.object(holder).unwrap();

        object.set_field_object(&cx, FieldOffset::of_word(0), Some(target)).unwrap();
        object.set_field_object_without_write_barrier(&cx, FieldOffset::of_word(1), Some(target)).unwrap();
        object.set_field_object(&cx, FieldOffset::of_word(1), None).unwrap();

        let seen = seen.lock().clone();
        assert_eq!(seen, vec![(FieldOffset::of_word(0), target, target.raw() as u64)]);
        assert_eq!(object.get_field_object(&cx, FieldOffset::of_word(0)).unwrap(), Some(target));
        assert_eq!(object.get_field_object_volatile(&cx, FieldOffset::of_word(1)).unwrap(), None);
    }

    #[test]
    fn test_cas_and_exchange_object() {
        let (cx, heap) = context(small_config());
        let holder = heap.allocate(1, 8, ReferenceMap::new(vec![0])).unwrap();
        let a = heap.allocate(2, 8, ReferenceMap::empty()).unwrap();
        let b = heap.allocate(2, 8, ReferenceMap::empty()).unwrap();
        swap_out(&cx, &heap, holder);
        let object = heap.object(holder).unwrap();
        let slot = FieldOffset::of_word(0);

        assert!(object.cas_field_object(&cx, slot, None, Some(a)).unwrap());
        assert!(!object.cas_field_object(&cx, slot, None, Some(b)).unwrap());
        assert_eq!(object.exchange_field_object(&cx, slot, Some(b)).unwrap(), Some(a));
        assert_eq!(object.get_field_object(&cx, slot).unwrap(), Some(b));
    }

    #[test]
    fn test_size_of_and_visit_through_stub() {
        let (cx, heap) = context(small_config());
        let holder = heap.allocate(1, 24, ReferenceMap::new(vec![0, 2])).unwrap();
        let target = heap.allocate(2, 8, ReferenceMap::empty()).unwrap();
        let direct_size = heap.object(holder).unwrap().size_of(&cx).unwrap();
        heap.object(holder)
            .unwrap()
            .set_field_object(&cx, FieldOffset::of_word(2), Some(target))
            .unwrap();
        swap_out(&cx, &heap, holder);

        let object = heap.object(holder).unwrap();
        assert_eq!(object.size_of(&cx).unwrap(), direct_size);

        let mut visited = Vec::new();
        object
            .visit_references(&cx, |offset, value| visited.push((offset, value)))
            .unwrap();
        assert_eq!(
            visited,
            vec![
                (FieldOffset::of_word(0), None),
                (FieldOffset::of_word(2), Some(target)),
            ]
        );
    }

    #[test]
    fn test_stub_header_mirrors_access_bits() {
        let (cx, heap) = context(small_config());
        let address = heap.allocate(1, 8, ReferenceMap::empty()).unwrap();
        swap_out(&cx, &heap, address);
        let object = heap.object(address).unwrap();
        assert!(!object.header().dirty_bit());

        object.get_field_64(&cx, FieldOffset::new(0)).unwrap();
        assert!(object.header().read_bit());
        assert!(!object.header().write_bit());

        object.set_field_64(&cx, FieldOffset::new(0), 1).unwrap();
        assert!(object.header().write_bit());
        assert!(object.header().dirty_bit());
        assert!(object.header().is_stub());
    }

    #[test]
    fn test_stall_warning_logged_once() {
        let config = SwapConfig {
            stall_warn_polls: 8,
            ..small_config()
        };
        let (cx, heap) = context(config);
        let address = heap.allocate(1, 8, ReferenceMap::empty()).unwrap();
        swap_out(&cx, &heap, address);
        let object = heap.object(address).unwrap();
        let entry = cx.stub_entry(object.as_stub().unwrap()).unwrap();
        assert!(entry.try_kernel_lock());

        let stalled = |cx: &SwapContext| {
            cx.logger()
                .get_events()
                .iter()
                .filter(|e| matches!(e, SwapEvent::HandshakeStall { .. }))
                .count()
        };

        std::thread::scope(|s| {
            let reader = s.spawn(|| object.get_field_64(&cx, FieldOffset::new(0)).unwrap());
            while stalled(cx.as_ref()) == 0 {
                std::thread::yield_now();
            }
            entry.kernel_unlock();
            assert_eq!(reader.join().unwrap(), 0);
        });

        assert_eq!(stalled(cx.as_ref()), 1);
    }
}
