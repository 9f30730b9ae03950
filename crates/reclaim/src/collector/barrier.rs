//! Write Barrier Boundary
//!
//! Reference stores through [`HeapObject::set_field_object`] and friends run
//! the collector's barrier after the store has landed in the resident
//! payload. The barrier sees the object as addressed by the mutator, which
//! may be a stub.

use crate::object::{FieldOffset, HeapObject, ObjectAddress};

/// Collector hook run after a reference store
pub trait WriteBarrier: Send + Sync {
    fn on_reference_store(&self, holder: &HeapObject, offset: FieldOffset, value: ObjectAddress);
}

/// Barrier for collectors that need none
pub struct NoWriteBarrier;

impl WriteBarrier for NoWriteBarrier {
    #[inline]
    fn on_reference_store(&self, _holder: &HeapObject, _offset: FieldOffset, _value: ObjectAddress) {}
}

impl<F> WriteBarrier for F
where
    F: Fn(&HeapObject, FieldOffset, ObjectAddress) + Send + Sync,
{
    #[inline]
    fn on_reference_store(&self, holder: &HeapObject, offset: FieldOffset, value: ObjectAddress) {
        self(holder, offset, value)
    }
}
