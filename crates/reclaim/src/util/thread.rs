//! Thread identity
//!
//! Free notifications carry the id of the thread that released the object.
//! Ids are small integers handed out on first use per OS thread.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Cell<u64> = const { Cell::new(0) };
}

/// Identifier of a runtime thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Id of the calling thread, allocated on first call
    pub fn current() -> Self {
        CURRENT.with(|slot| {
            let id = slot.get();
            if id != 0 {
                return ThreadId(id);
            }
            let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
            slot.set(id);
            ThreadId(id)
        })
    }

    /// Wrap a raw id, e.g. one received over the C ABI
    pub const fn from_raw(id: u64) -> Self {
        ThreadId(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}
