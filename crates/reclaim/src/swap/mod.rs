//! Swap Module - Swap-out, Swap-in and Entry Lifetime
//!
//! [`SwapContext`] is the capability every stub-aware operation takes. It
//! owns the reclamation table, the backend, and the address-to-entry
//! bindings of currently stubbed objects.
//!
//! ## Lifecycle
//!
//! ```text
//! Direct object ──swap_out (paused)──▶ Stub + entry (non-resident)
//!                                         │
//!                     first access / fault│ swap_in
//!                                         ▼
//!                                  Stub + entry (resident)
//!                                         │
//!                               free hook │ (object dead)
//!                                         ▼
//!                                  entry freed, storage discarded
//! ```
//!
//! Entries are created and freed only while holding the bindings lock, so
//! the table sees a single owner for both operations.

pub mod backend;
pub mod kernel;

pub use backend::{MemoryBackend, SwapBackend};
pub use kernel::{FaultOutcome, KernelSwapIn};

use crate::collector::{NoWriteBarrier, WriteBarrier};
use crate::config::{SwapConfig, SwapInFailurePolicy};
use crate::error::{ReclaimError, Result};
use crate::heap::{FreeHook, Heap};
use crate::logging::{SwapEvent, SwapLogger, SwapLoggerConfig};
use crate::object::{ObjectAddress, ObjectRef, Payload, Stub};
use crate::runtime::PauseGuard;
use crate::stats::{SwapStats, SwapTimer};
use crate::table::{EntryHandle, ReclamationTable, TableEntry};
use crate::util::{page_count_for, ThreadId};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Swapping capability shared by accessors, collector and runtime
pub struct SwapContext {
    config: SwapConfig,
    table: Arc<ReclamationTable>,
    backend: Arc<dyn SwapBackend>,
    /// Stubbed addresses and their entries
    bindings: Mutex<FxHashMap<ObjectAddress, EntryHandle>>,
    write_barrier: Arc<dyn WriteBarrier>,
    stats: Arc<SwapStats>,
    logger: Arc<SwapLogger>,
}

impl SwapContext {
    /// Context over `table`, which must be valid
    pub fn new(
        config: SwapConfig,
        table: Arc<ReclamationTable>,
        backend: Arc<dyn SwapBackend>,
    ) -> Result<Self> {
        if !table.is_valid() {
            return Err(ReclaimError::TableUnavailable(format!(
                "table of {} entries has no backing storage",
                config.table_entries
            )));
        }

        let logger_config = if config.verbose {
            SwapLoggerConfig::verbose()
        } else {
            SwapLoggerConfig::default()
        };

        let stats = SwapStats::new();
        stats.set_enabled(config.stats_enabled);

        Ok(Self {
            config,
            table,
            backend,
            bindings: Mutex::new(FxHashMap::default()),
            write_barrier: Arc::new(NoWriteBarrier),
            stats: Arc::new(stats),
            logger: Arc::new(SwapLogger::new(logger_config)),
        })
    }

    pub fn with_write_barrier(mut self, barrier: Arc<dyn WriteBarrier>) -> Self {
        self.write_barrier = barrier;
        self
    }

    pub fn with_logger(mut self, logger: Arc<SwapLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    pub fn table(&self) -> &ReclamationTable {
        &self.table
    }

    pub fn backend(&self) -> &dyn SwapBackend {
        self.backend.as_ref()
    }

    pub fn write_barrier(&self) -> &dyn WriteBarrier {
        self.write_barrier.as_ref()
    }

    pub fn stats(&self) -> &SwapStats {
        &self.stats
    }

    pub fn logger(&self) -> &SwapLogger {
        &self.logger
    }

    pub(crate) fn log(&self, event: SwapEvent) {
        self.logger.log(event);
    }

    /// Stop every mutator registered with the table's safepoint
    pub fn pause(&self) -> PauseGuard<'_> {
        self.table.safepoint().pause()
    }

    /// Entry bound to a stubbed address
    pub fn entry_for(&self, address: ObjectAddress) -> Option<EntryHandle> {
        self.bindings.lock().get(&address).copied()
    }

    /// Number of stubbed addresses
    pub fn bound_count(&self) -> usize {
        self.bindings.lock().len()
    }

    /// Entry of a stub
    pub fn stub_entry(&self, stub: &Stub) -> Result<&TableEntry> {
        self.table.entry(stub.entry())
    }

    /// Turn the object at `address` into a stub
    ///
    /// The payload is written through the backend and the object switches
    /// in place to a non-resident stub, so handles taken before the pause
    /// redirect from their next access. Objects carrying the no-swap flag
    /// and objects that are already stubs are refused, as is a pause from
    /// any safepoint other than the table's.
    pub fn swap_out(
        &self,
        heap: &Heap,
        address: ObjectAddress,
        pause: &PauseGuard<'_>,
    ) -> Result<EntryHandle> {
        self.table.check_pause(pause)?;
        let object = heap.object(address)?;
        let payload = match object.resolve() {
            ObjectRef::Direct(payload) => payload,
            ObjectRef::Indirect(_) => {
                return Err(ReclaimError::invalid_state(
                    "resident object",
                    format!("stub at {}", address),
                ))
            }
        };
        if payload.header().has_no_swap_flag() {
            return Err(ReclaimError::NotSwappable {
                address: address.raw(),
            });
        }

        let mut bindings = self.bindings.lock();
        let handle = self.table.create_entry()?;

        let written = match self.backend.write_out(handle, payload) {
            Ok(written) => written,
            Err(e) => {
                self.table.free_entry(handle)?;
                return Err(ReclaimError::SwapOutFailed {
                    address: address.raw(),
                    reason: e.to_string(),
                });
            }
        };

        let pages = page_count_for(written);
        let entry = self.table.entry(handle)?;
        entry.set_page_count(pages);
        entry.set_stub_back_pointer(address.raw());

        if object.install_stub(Stub::new(handle, payload)).is_err() {
            self.backend.discard(handle);
            self.table.free_entry(handle)?;
            return Err(ReclaimError::invalid_state(
                "resident object",
                format!("stub installed concurrently at {}", address),
            ));
        }
        bindings.insert(address, handle);
        drop(bindings);

        self.stats.record_swap_out();
        self.log(SwapEvent::SwapOut {
            entry: handle.as_u32(),
            address: address.raw(),
            pages,
        });
        Ok(handle)
    }

    /// Resident payload of `stub`, swapping it in if needed
    ///
    /// The caller holds the entry through the app-thread handshake.
    pub(crate) fn ensure_resident<'s>(&self, stub: &'s Stub, entry: &TableEntry) -> Result<&'s Payload> {
        if entry.resident_bit() {
            if let Some(payload) = stub.resident_slot().get() {
                return Ok(payload);
            }
        }
        self.swap_in(stub, entry)
    }

    fn swap_in<'s>(&self, stub: &'s Stub, entry: &TableEntry) -> Result<&'s Payload> {
        let timer = SwapTimer::new();
        let payload = match self.backend.read_in(stub.entry()) {
            Ok(payload) => payload,
            Err(e) => return Err(self.swap_in_failed(stub.entry(), e)),
        };

        let payload = self.populate(stub, entry, payload);
        self.stats.record_swap_in(timer.elapsed_us(), false);
        self.log(SwapEvent::SwapIn {
            entry: stub.entry().as_u32(),
            pages: entry.page_count(),
            duration_us: timer.elapsed_us(),
            kernel: false,
        });
        Ok(payload)
    }

    /// Install `payload` in the stub and publish it through the entry
    ///
    /// A payload installed first by a racing thread wins; `payload` is then
    /// dropped and the entry still ends resident.
    pub(crate) fn populate<'s>(&self, stub: &'s Stub, entry: &TableEntry, payload: Payload) -> &'s Payload {
        let pages = page_count_for(payload.size());
        let (resident, _installed) = stub.resident_slot().install(Box::new(payload));
        entry.set_object_address(stub.resident_slot().address());
        if entry.page_count() == 0 {
            entry.set_page_count(pages);
        }
        entry.set_resident_bit();
        resident
    }

    /// Apply the configured policy to a failed swap-in
    pub(crate) fn swap_in_failed(&self, handle: EntryHandle, cause: ReclaimError) -> ReclaimError {
        let reason = match cause {
            ReclaimError::SwapInFailed { reason, .. } => reason,
            other => other.to_string(),
        };
        self.stats.record_swap_in_failure();
        self.log(SwapEvent::SwapInFailed {
            entry: handle.as_u32(),
            reason: reason.clone(),
        });

        if self.config.swap_in_failure == SwapInFailurePolicy::Abort {
            log::error!("swap-in of entry {} failed: {}; aborting", handle, reason);
            std::process::abort();
        }
        ReclaimError::SwapInFailed {
            entry: handle.index(),
            reason,
        }
    }

    /// Drop the binding of `address`; returns the entry it held
    fn unbind(&self, address: ObjectAddress) -> Result<Option<EntryHandle>> {
        let mut bindings = self.bindings.lock();
        match bindings.remove(&address) {
            Some(handle) => {
                self.table.free_entry(handle)?;
                Ok(Some(handle))
            }
            None => Ok(None),
        }
    }
}

impl FreeHook for SwapContext {
    fn record_free(&self, thread: ThreadId, address: ObjectAddress) {
        match self.unbind(address) {
            Ok(Some(handle)) => {
                self.backend.discard(handle);
                self.stats.record_free_notification(true);
                log::trace!("{} freed {} with entry {}", thread, address, handle);
                self.log(SwapEvent::EntryFreed {
                    entry: handle.as_u32(),
                    address: address.raw(),
                });
            }
            Ok(None) => self.stats.record_free_notification(false),
            Err(e) => log::error!("free notification for {} failed: {}", address, e),
        }
    }
}

impl std::fmt::Debug for SwapContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapContext")
            .field("table", &self.table)
            .field("backend", &self.backend.name())
            .field("bound", &self.bound_count())
            .finish()
    }
}
