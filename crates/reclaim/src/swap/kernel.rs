//! Kernel Role - Fault-Driven Swap-In
//!
//! Stands in for the page-fault handler that populates a stub's payload
//! without the accessing mutator's involvement. It never blocks: the entry
//! is taken with a single `fetch_or`, the payload is published with a CAS
//! on the stub's slot, and the lock is dropped with a single `fetch_and`.
//!
//! Mutators arriving while the kernel lock is held spin in the handshake
//! until it is released.

use super::SwapContext;
use crate::error::Result;
use crate::logging::SwapEvent;
use crate::object::Stub;
use crate::stats::SwapTimer;
use crate::table::TableEntry;

/// Result of a fault-in attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// This call populated the payload
    Populated,
    /// Payload was already present
    AlreadyResident,
    /// Another kernel actor holds the entry
    Busy,
}

/// Kernel lock held for the duration of a fault
struct KernelLock<'a>(&'a TableEntry);

impl<'a> KernelLock<'a> {
    fn try_acquire(entry: &'a TableEntry) -> Option<Self> {
        entry.try_kernel_lock().then_some(KernelLock(entry))
    }
}

impl Drop for KernelLock<'_> {
    fn drop(&mut self) {
        self.0.kernel_unlock();
    }
}

/// Kernel-side populate path over a [`SwapContext`]
pub struct KernelSwapIn<'a> {
    cx: &'a SwapContext,
}

impl<'a> KernelSwapIn<'a> {
    pub fn new(cx: &'a SwapContext) -> Self {
        Self { cx }
    }

    /// Populate the payload of `stub` under the kernel lock
    ///
    /// On a backend failure the entry stays non-resident and the lock is
    /// released before the error is returned.
    pub fn fault_in(&self, stub: &Stub) -> Result<FaultOutcome> {
        let entry = self.cx.stub_entry(stub)?;
        let Some(_lock) = KernelLock::try_acquire(entry) else {
            return Ok(FaultOutcome::Busy);
        };

        if entry.resident_bit() && stub.resident_slot().get().is_some() {
            return Ok(FaultOutcome::AlreadyResident);
        }

        let timer = SwapTimer::new();
        let payload = match self.cx.backend().read_in(stub.entry()) {
            Ok(payload) => payload,
            Err(e) => return Err(self.cx.swap_in_failed(stub.entry(), e)),
        };
        self.cx.populate(stub, entry, payload);

        let duration_us = timer.elapsed_us();
        self.cx.stats().record_swap_in(duration_us, true);
        self.cx.log(SwapEvent::SwapIn {
            entry: stub.entry().as_u32(),
            pages: entry.page_count(),
            duration_us,
            kernel: true,
        });
        Ok(FaultOutcome::Populated)
    }
}
