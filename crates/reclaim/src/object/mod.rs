//! Object Module - Heap Objects and Stubs
//!
//! The managed object model kept to what the swapping protocol needs: a
//! header with the stub bit, a field area, and which fields are references.
//!
//! ```text
//! ObjectRef::Direct(Payload)         ObjectRef::Indirect(Stub)
//! ┌──────────────┐                   ┌──────────────┐       ┌──────────────┐
//! │ header       │                   │ header (stub)│       │ TableEntry   │
//! │ fields ...   │                   │ entry ───────┼──────▶│ resident?    │
//! └──────────────┘                   │ slot ──┐     │       │ address ──┐  │
//!                                    └────────┼─────┘       └───────────┼──┘
//!                                             ▼                         │
//!                                        ┌──────────┐◀──────────────────┘
//!                                        │ Payload  │ (after swap-in)
//!                                        └──────────┘
//! ```
//!
//! A [`HeapObject`] starts direct and becomes indirect at most once. The
//! resolved variant and the header stub bit always agree: the bit is set
//! when the stub is built and never cleared.

pub mod fields;
pub mod header;
pub mod payload;
pub mod stub;

pub use fields::{FieldOffset, Fields, Primitive, ReferenceMap, WORD_SIZE};
pub use header::{ObjectHeader, HEADER_SIZE};
pub use payload::{Payload, PayloadImage};
pub use stub::{ResidentSlot, Stub};

use std::fmt;
use std::sync::OnceLock;

/// Address of an object in the managed heap
///
/// Zero is reserved for null references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectAddress(usize);

impl ObjectAddress {
    /// Non-null address; `None` for zero
    pub fn new(raw: usize) -> Option<Self> {
        (raw != 0).then_some(ObjectAddress(raw))
    }

    #[inline]
    pub fn raw(self) -> usize {
        self.0
    }

    /// Reference word stored in a field
    #[inline]
    pub fn encode(reference: Option<ObjectAddress>) -> u64 {
        reference.map_or(0, |a| a.0 as u64)
    }

    /// Reference read back from a field
    #[inline]
    pub fn decode(word: u64) -> Option<ObjectAddress> {
        ObjectAddress::new(word as usize)
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// An object as it sits at its heap address
///
/// Allocated with its payload in place. Swap-out installs a stub into the
/// same object, so every handle to the address sees the switch on its next
/// access. From then on the stub is authoritative and the in-place fields
/// are cleared.
pub struct HeapObject {
    direct: Payload,
    stub: OnceLock<Stub>,
}

/// Per-access view of a [`HeapObject`]
#[derive(Clone, Copy)]
pub enum ObjectRef<'a> {
    /// Payload allocated in place
    Direct(&'a Payload),
    /// Swapped out; payload reached through the table
    Indirect(&'a Stub),
}

impl HeapObject {
    pub fn new(payload: Payload) -> Self {
        debug_assert!(!payload.header().is_stub());
        Self {
            direct: payload,
            stub: OnceLock::new(),
        }
    }

    /// Header at the object's address (the stub's own header for a stub)
    #[inline]
    pub fn header(&self) -> &ObjectHeader {
        match self.resolve() {
            ObjectRef::Direct(payload) => payload.header(),
            ObjectRef::Indirect(stub) => stub.header(),
        }
    }

    /// Whether accesses must be redirected
    #[inline(always)]
    pub fn is_stub(&self) -> bool {
        self.stub.get().is_some()
    }

    /// Current state of the object
    ///
    /// Only swap-out changes the answer, and it runs while mutators are
    /// paused, so a view taken inside one access stays current for it.
    #[inline(always)]
    pub fn resolve(&self) -> ObjectRef<'_> {
        match self.stub.get() {
            None => ObjectRef::Direct(&self.direct),
            Some(stub) => {
                debug_assert!(stub.header().is_stub());
                ObjectRef::Indirect(stub)
            }
        }
    }

    pub fn as_stub(&self) -> Option<&Stub> {
        self.stub.get()
    }

    /// Turn the object into `stub`
    ///
    /// Hands the stub back if the object already is one. The in-place
    /// payload is cleared once the stub is visible.
    pub(crate) fn install_stub(&self, stub: Stub) -> std::result::Result<(), Stub> {
        self.stub.set(stub)?;
        self.direct.fields().clear();
        Ok(())
    }

    /// Class id; served from the stub's cached header without a swap-in
    pub fn class_id(&self) -> u32 {
        self.header().class_id()
    }

    /// Bytes the object occupies in its space
    pub fn allocation_size(&self) -> usize {
        match self.resolve() {
            ObjectRef::Direct(payload) => payload.size(),
            ObjectRef::Indirect(stub) => stub.object_size(),
        }
    }
}

impl fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resolve() {
            ObjectRef::Direct(payload) => f.debug_tuple("Direct").field(payload).finish(),
            ObjectRef::Indirect(stub) => f.debug_tuple("Indirect").field(stub).finish(),
        }
    }
}
