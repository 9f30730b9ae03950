//! # Reclaim - Transparent Object Swapping for a Managed Heap
//!
//! Reclaim evicts the payload of cold live objects to secondary storage and
//! leaves a *stub* at the object's address. The first later access brings
//! the payload back without the accessing code noticing.
//!
//! ## Overview
//!
//! - **Reclamation table**: fixed pool of per-object swap metadata, one
//!   entry per swapped object, backed by a single anonymous mapping
//! - **App-thread handshake**: non-blocking spin protocol between mutators
//!   and the kernel role that populates payloads on a fault
//! - **Stub indirection**: every field accessor and the collector's field
//!   visitor check one header bit and redirect through the entry when set
//! - **Free hook and exclusion**: every space reports deallocations so the
//!   entry is released before the address is reused; zygote large objects
//!   and objects handed to native code are never swapped
//!
//! ## Quick Start
//!
//! ```rust
//! use reclaim::object::{FieldOffset, ReferenceMap};
//! use reclaim::{SwapConfig, SwapRuntime};
//!
//! fn main() -> Result<(), reclaim::ReclaimError> {
//!     let runtime = SwapRuntime::new(SwapConfig::default())?;
//!     runtime.start()?;
//!
//!     let address = runtime.allocate(1, 16, ReferenceMap::empty())?;
//!     let cx = runtime.context();
//!     runtime.object(address)?.set_field_64(cx, FieldOffset::new(8), 42)?;
//!
//!     // The object now sits behind a stub.
//!     runtime.swap_out(address)?;
//!
//!     // Reading it swaps the payload back in.
//!     let value = runtime.object(address)?.get_field_64(cx, FieldOffset::new(8))?;
//!     assert_eq!(value, 42);
//!
//!     runtime.stop()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Mutator Threads                       │
//! │     get_field_* / set_field_* / cas_* / visit_references  │
//! │                           │                               │
//! │          stub bit clear ──┴── stub bit set                │
//! │               │                    │                      │
//! │          direct access     handshake on entry             │
//! │                            ensure resident ──▶ SwapBackend│
//! │                            access, refresh, unlock        │
//! └──────────────────────────────┬───────────────────────────┘
//!                                │
//! ┌──────────────────────────────┴───────────────────────────┐
//! │                   ReclamationTable                        │
//! │   [occupied|kernel_lock|resident] counter pages address   │
//! └──────────────────────────────┬───────────────────────────┘
//!                                │
//!             kernel role: try_kernel_lock, CAS install
//! ```
//!
//! ## Modules
//!
//! - [`table`]: reclamation table, entries and the handshake
//! - [`object`]: headers, field storage, payloads and stubs
//! - [`access`]: stub-aware field accessors
//! - [`swap`]: swap context, backends and the kernel role
//! - [`heap`]: object spaces and the free hook
//! - [`collector`]: reachability tracing and the write barrier boundary
//! - [`native`]: global and weak-global handles for native code
//! - [`runtime`]: runtime lifecycle and safepoints
//! - [`stats`], [`logging`]: counters, metrics export, structured events
//! - [`config`], [`error`], [`util`]
//!
//! ## Limitations
//!
//! - A kernel lock that is never released keeps mutators spinning on that
//!   entry forever; a warning is logged once per stalled handshake
//! - Which objects to swap out is left to the caller

// Core swapping
pub mod access;
pub mod config;
pub mod error;
pub mod swap;
pub mod table;

// Object model and memory
pub mod heap;
pub mod object;

// Collector and native boundaries
pub mod collector;
pub mod native;

// Runtime and monitoring
pub mod logging;
pub mod runtime;
pub mod stats;

// Utilities
pub mod util;

pub use config::{SwapConfig, SwapInFailurePolicy};
pub use error::{ReclaimError, Result};
pub use heap::{FreeHook, Heap, HeapMode};
pub use object::{HeapObject, ObjectAddress};
pub use runtime::{PauseGuard, RuntimeState, Safepoint, SwapRuntime};
pub use swap::{MemoryBackend, SwapBackend, SwapContext};
pub use table::{EntryHandle, ReclamationTable, TableEntry};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runtime with default configuration
///
/// The runtime must be started with [`SwapRuntime::start`] before use.
///
/// ```rust
/// let runtime = reclaim::init()?;
/// runtime.start()?;
/// runtime.stop()?;
/// # Ok::<(), reclaim::ReclaimError>(())
/// ```
pub fn init() -> Result<SwapRuntime> {
    SwapRuntime::new(SwapConfig::default())
}

/// Runtime with custom configuration
pub fn init_with_config(config: SwapConfig) -> Result<SwapRuntime> {
    SwapRuntime::new(config)
}
