//! Collector Module - Reachability Tracing
//!
//! A breadth-first marker over the heap that reads references only through
//! [`HeapObject::visit_references`], so stubs are traced like any other
//! object (swapping them in if needed). The resulting [`HeapLiveBitmap`]
//! drives [`Heap::sweep`], whose free hook releases the table entries of
//! dead stubs.
//!
//! ```text
//! roots ──▶ queue ──▶ visit_references ──▶ mark ──▶ queue ...
//!                                   │
//!                                   └─ stub: handshake + swap-in
//! ```

pub mod barrier;

pub use barrier::{NoWriteBarrier, WriteBarrier};

use crate::error::{ReclaimError, Result};
use crate::heap::{Heap, HeapLiveBitmap};
use crate::object::ObjectAddress;
use crate::swap::SwapContext;
use std::collections::VecDeque;

/// Outcome of one trace
pub struct TraceResult {
    pub live: HeapLiveBitmap,
    /// Objects whose references were visited
    pub visited: usize,
    /// Visited objects that were stubs
    pub stubs_traversed: usize,
    /// References to addresses with no object
    pub dangling: usize,
}

/// Marker over one heap
pub struct Tracer<'a> {
    heap: &'a Heap,
    cx: &'a SwapContext,
}

impl<'a> Tracer<'a> {
    pub fn new(heap: &'a Heap, cx: &'a SwapContext) -> Self {
        Self { heap, cx }
    }

    /// Mark everything reachable from `roots`
    ///
    /// Roots must name live objects.
    pub fn trace<I>(&self, roots: I) -> Result<TraceResult>
    where
        I: IntoIterator<Item = ObjectAddress>,
    {
        let live = self.heap.new_live_bitmap();
        let mut queue = VecDeque::new();

        for root in roots {
            if !self.heap.contains(root) {
                return Err(ReclaimError::InvalidAddress {
                    address: root.raw(),
                });
            }
            if live.mark(root) {
                queue.push_back(root);
            }
        }

        let mut result = TraceResult {
            live,
            visited: 0,
            stubs_traversed: 0,
            dangling: 0,
        };

        while let Some(address) = queue.pop_front() {
            let Some(object) = self.heap.get(address) else {
                continue;
            };
            result.visited += 1;
            if object.is_stub() {
                result.stubs_traversed += 1;
            }

            let mut dangling = 0;
            object.visit_references(self.cx, |offset, reference| {
                let Some(target) = reference else {
                    return;
                };
                if !self.heap.contains(target) {
                    log::warn!(
                        "{} field {} refers to {} which holds no object",
                        address,
                        offset.value(),
                        target
                    );
                    dangling += 1;
                } else if result.live.mark(target) {
                    queue.push_back(target);
                }
            })?;
            result.dangling += dangling;
        }

        log::debug!(
            "trace: {} objects visited, {} through stubs",
            result.visited,
            result.stubs_traversed
        );
        Ok(result)
    }
}
