//! Runtime Module - Swapping Runtime Integration
//!
//! [`SwapRuntime`] wires one reclamation table (with its safepoint), swap
//! context, heap and native reference table together. It is an owned value, not a
//! process global; native callers that need a global keep one in the C ABI
//! crate.
//!
//! Manages:
//! - runtime lifecycle
//! - pauses and lock recovery after them
//! - swap-out and fault-in requests
//! - collection (trace, weak clearing, sweep)

pub mod safepoint;

pub use safepoint::{PauseGuard, Safepoint};

use crate::collector::{TraceResult, Tracer};
use crate::config::SwapConfig;
use crate::error::{ReclaimError, Result};
use crate::heap::{Heap, HeapMode, SweepStats};
use crate::logging::{self, SwapEvent};
use crate::native::{NativeRef, NativeRefTable};
use crate::object::{HeapObject, ObjectAddress, ReferenceMap};
use crate::stats::SwapMetrics;
use crate::swap::{FaultOutcome, KernelSwapIn, MemoryBackend, SwapBackend, SwapContext};
use crate::table::{EntryHandle, ReclamationTable};
use crate::util::ThreadId;
use parking_lot::Mutex;
use std::sync::Arc;

/// Runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Runtime not yet started
    Initialized,
    /// Runtime running normally
    Running,
    /// Runtime is stopping
    Stopping,
    /// Runtime has stopped
    Stopped,
}

/// Outcome of [`SwapRuntime::collect`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub objects_traced: usize,
    pub stubs_traced: usize,
    pub weak_refs_cleared: usize,
    pub swept: SweepStats,
}

/// Swapping runtime
pub struct SwapRuntime {
    config: SwapConfig,
    context: Arc<SwapContext>,
    heap: Arc<Heap>,
    native_refs: NativeRefTable,
    state: Mutex<RuntimeState>,
}

impl SwapRuntime {
    /// Runtime with an in-memory backend
    pub fn new(config: SwapConfig) -> Result<Self> {
        Self::with_backend(config, Arc::new(MemoryBackend::new()))
    }

    /// Runtime over `backend`
    pub fn with_backend(config: SwapConfig, backend: Arc<dyn SwapBackend>) -> Result<Self> {
        config.validate()?;

        let table = Arc::new(ReclamationTable::create_table(config.table_entries));
        if !table.is_valid() {
            logging::log_event(SwapEvent::TableUnavailable {
                entries: config.table_entries,
            });
        }
        let context = Arc::new(SwapContext::new(config.clone(), table, backend)?);
        context.log(SwapEvent::TableCreated {
            entries: context.table().capacity(),
            bytes: context.table().size_in_bytes(),
        });

        for _ in 0..config.mutator_threads {
            context.table().safepoint().register_thread();
        }
        let heap = Arc::new(Heap::new(&config, context.clone()));

        Ok(Self {
            config,
            context,
            heap,
            native_refs: NativeRefTable::new(),
            state: Mutex::new(RuntimeState::Initialized),
        })
    }

    /// Start runtime
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            RuntimeState::Initialized | RuntimeState::Stopped => {
                *state = RuntimeState::Running;
                log::info!(
                    "swap runtime started: {} table entries, backend {}",
                    self.context.table().capacity(),
                    self.context.backend().name()
                );
                Ok(())
            }
            other => Err(ReclaimError::invalid_state(
                "Initialized or Stopped",
                format!("{:?}", other),
            )),
        }
    }

    /// Stop runtime
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != RuntimeState::Running {
                return Err(ReclaimError::invalid_state("Running", format!("{:?}", *state)));
            }
            *state = RuntimeState::Stopping;
        }

        log::info!("swap runtime stopping: {:?}", self.context.stats().summary());
        *self.state.lock() = RuntimeState::Stopped;
        Ok(())
    }

    /// Get runtime state
    pub fn state(&self) -> RuntimeState {
        *self.state.lock()
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            RuntimeState::Running => Ok(()),
            other => Err(ReclaimError::invalid_state("Running", format!("{:?}", other))),
        }
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<SwapContext> {
        &self.context
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    pub fn native_refs(&self) -> &NativeRefTable {
        &self.native_refs
    }

    pub fn safepoint(&self) -> &Safepoint {
        self.context.table().safepoint()
    }

    /// Allocate a zeroed object
    pub fn allocate(&self, class_id: u32, field_bytes: usize, references: ReferenceMap) -> Result<ObjectAddress> {
        self.ensure_running()?;
        self.heap.allocate(class_id, field_bytes, references)
    }

    /// Object at `address`
    pub fn object(&self, address: ObjectAddress) -> Result<Arc<HeapObject>> {
        self.heap.object(address)
    }

    /// Switch the heap in or out of zygote mode
    pub fn set_heap_mode(&self, mode: HeapMode) {
        log::info!("heap mode {:?} -> {:?}", self.heap.mode(), mode);
        self.heap.set_mode(mode);
    }

    // === Pauses ===

    /// Stop every registered mutator
    ///
    /// Must not be called from a registered mutator.
    pub fn pause(&self) -> PauseGuard<'_> {
        self.context.pause()
    }

    /// Clear all entry lock state; returns entries that had any
    pub fn recover_after_pause(&self, pause: &PauseGuard<'_>) -> Result<usize> {
        let cleared = self.context.table().unlock_all_entries(pause)?;
        self.context.stats().record_unlock_all();
        self.context.log(SwapEvent::UnlockAll {
            entries_cleared: cleared,
        });
        Ok(cleared)
    }

    /// Mutator poll point
    pub fn check_safepoint(&self) -> bool {
        self.safepoint().poll()
    }

    pub fn register_mutator(&self) {
        self.safepoint().register_thread();
    }

    pub fn unregister_mutator(&self) {
        self.safepoint().unregister_thread();
    }

    // === Swapping ===

    /// Swap out one object under a fresh pause
    pub fn swap_out(&self, address: ObjectAddress) -> Result<EntryHandle> {
        self.ensure_running()?;
        let pause = self.pause();
        self.context.swap_out(&self.heap, address, &pause)
    }

    /// Swap out several objects under one pause
    ///
    /// Objects that cannot be swapped are skipped; returns the entries of
    /// those that were.
    pub fn swap_out_all(&self, addresses: &[ObjectAddress]) -> Result<Vec<EntryHandle>> {
        self.ensure_running()?;
        let pause = self.pause();
        let mut handles = Vec::with_capacity(addresses.len());
        for &address in addresses {
            match self.context.swap_out(&self.heap, address, &pause) {
                Ok(handle) => handles.push(handle),
                Err(e) if e.is_recoverable() => log::debug!("skipping {}: {}", address, e),
                Err(e) => return Err(e),
            }
        }
        Ok(handles)
    }

    /// Populate a stub's payload through the kernel role
    pub fn fault_in(&self, address: ObjectAddress) -> Result<FaultOutcome> {
        let object = self.heap.object(address)?;
        let stub = object.as_stub().ok_or_else(|| {
            ReclaimError::invalid_state("stub", format!("resident object at {}", address))
        })?;
        KernelSwapIn::new(&self.context).fault_in(stub)
    }

    // === Collection ===

    /// Trace from `roots` plus native globals, clear dead weak handles, sweep
    pub fn collect(&self, roots: &[ObjectAddress]) -> Result<CollectStats> {
        self.ensure_running()?;
        let pause = self.pause();

        let mut all_roots = roots.to_vec();
        all_roots.extend(self.native_refs.global_roots());
        let TraceResult {
            live,
            visited,
            stubs_traversed,
            ..
        } = Tracer::new(&self.heap, &self.context).trace(all_roots)?;

        let weak_refs_cleared = self.native_refs.sweep_weak(&live);
        let swept = self.heap.sweep(ThreadId::current(), &live);
        drop(pause);

        log::debug!(
            "collect: {} traced, {} freed ({} bytes), {} weak handles cleared",
            visited,
            swept.objects_freed,
            swept.bytes_freed,
            weak_refs_cleared
        );
        Ok(CollectStats {
            objects_traced: visited,
            stubs_traced: stubs_traversed,
            weak_refs_cleared,
            swept,
        })
    }

    /// Release one large object
    pub fn free_large_object(&self, address: ObjectAddress) -> Result<usize> {
        self.heap.free_large_object(ThreadId::current(), address)
    }

    // === Native references ===

    pub fn add_global_ref(&self, object: Option<ObjectAddress>) -> Result<Option<NativeRef>> {
        self.native_refs.add_global_ref(&self.heap, &self.context, object)
    }

    pub fn add_weak_global_ref(&self, object: Option<ObjectAddress>) -> Result<Option<NativeRef>> {
        self.native_refs.add_weak_global_ref(&self.heap, &self.context, object)
    }

    pub fn delete_global_ref(&self, handle: NativeRef) -> bool {
        self.native_refs.delete_global_ref(handle)
    }

    pub fn delete_weak_global_ref(&self, handle: NativeRef) -> bool {
        self.native_refs.delete_weak_global_ref(handle)
    }

    pub fn decode_native_ref(&self, handle: NativeRef) -> Result<Option<ObjectAddress>> {
        self.native_refs.decode(handle)
    }

    // === Monitoring ===

    pub fn metrics(&self) -> SwapMetrics {
        SwapMetrics::from_stats(self.context.stats())
    }
}
