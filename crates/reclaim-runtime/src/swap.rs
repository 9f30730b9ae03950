//! Swap Runtime - C FFI wrapper for reclaim
//!
//! Every function returns a neutral value (`false`, `0`, null address) on
//! failure and logs the cause; nothing unwinds across the boundary.
//! Object addresses and reference handles travel as plain integers, with
//! zero meaning null.

use anyhow::{anyhow, Context};
use reclaim::native::NativeRef;
use reclaim::object::{FieldOffset, ReferenceMap};
use reclaim::table::{EntryHandle, TableEntry};
use reclaim::{ObjectAddress, SwapConfig, SwapRuntime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

static RUNTIME: OnceLock<SwapRuntime> = OnceLock::new();
static INITIALIZED: AtomicBool = AtomicBool::new(false);

fn runtime() -> anyhow::Result<&'static SwapRuntime> {
    RUNTIME.get().ok_or_else(|| anyhow!("swap runtime not initialized"))
}

fn address(raw: usize) -> anyhow::Result<ObjectAddress> {
    ObjectAddress::new(raw).ok_or_else(|| anyhow!("null object address"))
}

fn entry(index: u32) -> anyhow::Result<&'static TableEntry> {
    let table = runtime()?.context().table();
    table
        .entry(EntryHandle::from_raw(index))
        .with_context(|| format!("entry {} of a {}-entry table", index, table.capacity()))
}

/// Log the error of `result` under `what`, then fall back to `default`
fn report<T>(what: &str, result: anyhow::Result<T>, default: T) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            log::error!("{}: {:#}", what, e);
            default
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Start the runtime with configuration from `RECLAIM_*` variables
#[no_mangle]
pub extern "C" fn reclaim_init() -> bool {
    if INITIALIZED.load(Ordering::SeqCst) {
        return true;
    }

    let result = (|| -> anyhow::Result<()> {
        if let Some(runtime) = RUNTIME.get() {
            runtime.start().context("restarting swap runtime")?;
        } else {
            let runtime = SwapRuntime::new(SwapConfig::from_env())
                .context("creating swap runtime")?;
            runtime.start().context("starting swap runtime")?;
            if RUNTIME.set(runtime).is_err() {
                return Err(anyhow!("swap runtime initialized concurrently"));
            }
        }
        Ok(())
    })();

    let ok = report("reclaim_init", result.map(|()| true), false);
    if ok {
        INITIALIZED.store(true, Ordering::SeqCst);
    }
    ok
}

#[no_mangle]
pub extern "C" fn reclaim_shutdown() {
    if let Some(runtime) = RUNTIME.get() {
        if let Err(e) = runtime.stop() {
            log::warn!("reclaim_shutdown: {}", e);
        }
    }
    INITIALIZED.store(false, Ordering::SeqCst);
}

// ============================================================================
// Objects
// ============================================================================

/// Allocate a zeroed object with no reference fields; 0 on failure
#[no_mangle]
pub extern "C" fn reclaim_alloc(class_id: u32, field_bytes: usize) -> usize {
    if !INITIALIZED.load(Ordering::SeqCst) {
        reclaim_init();
    }
    let result = runtime().and_then(|rt| {
        rt.allocate(class_id, field_bytes, ReferenceMap::empty())
            .map(ObjectAddress::raw)
            .with_context(|| format!("allocating {} field bytes", field_bytes))
    });
    report("reclaim_alloc", result, 0)
}

/// Read a 64-bit field, following a stub if needed
#[no_mangle]
pub extern "C" fn reclaim_get_field_64(object: usize, offset: u32, out: *mut i64) -> bool {
    if out.is_null() {
        log::error!("reclaim_get_field_64: null out pointer");
        return false;
    }
    let result = (|| -> anyhow::Result<i64> {
        let rt = runtime()?;
        let value = rt
            .object(address(object)?)?
            .get_field_64(rt.context(), FieldOffset::new(offset))?;
        Ok(value)
    })();
    match result {
        Ok(value) => {
            // SAFETY: `out` is non-null and the caller passes a writable i64.
            unsafe { *out = value };
            true
        }
        Err(e) => {
            log::error!("reclaim_get_field_64({:#x}, {}): {:#}", object, offset, e);
            false
        }
    }
}

/// Write a 64-bit field, following a stub if needed
#[no_mangle]
pub extern "C" fn reclaim_set_field_64(object: usize, offset: u32, value: i64) -> bool {
    let result = (|| -> anyhow::Result<bool> {
        let rt = runtime()?;
        rt.object(address(object)?)?
            .set_field_64(rt.context(), FieldOffset::new(offset), value)?;
        Ok(true)
    })();
    report("reclaim_set_field_64", result, false)
}

/// Swap out one object; returns its entry index, or -1
#[no_mangle]
pub extern "C" fn reclaim_swap_out(object: usize) -> i64 {
    let result = (|| -> anyhow::Result<i64> {
        let handle = runtime()?.swap_out(address(object)?)?;
        Ok(i64::from(handle.as_u32()))
    })();
    match result {
        Ok(index) => index,
        Err(e) => {
            // Pinned objects and a full table are expected refusals.
            match e.downcast_ref::<reclaim::ReclaimError>() {
                Some(inner) if inner.is_recoverable() => {
                    log::debug!("reclaim_swap_out({:#x}): {}", object, inner)
                }
                _ => log::error!("reclaim_swap_out({:#x}): {:#}", object, e),
            }
            -1
        }
    }
}

/// Release a large object; its entry is freed before the address is reused
#[no_mangle]
pub extern "C" fn reclaim_free_large_object(object: usize) -> bool {
    let result = (|| -> anyhow::Result<bool> {
        runtime()?.free_large_object(address(object)?)?;
        Ok(true)
    })();
    report("reclaim_free_large_object", result, false)
}

// ============================================================================
// Native references
// ============================================================================

/// Global reference to `object`, pinning it; 0 for a null object or on failure
#[no_mangle]
pub extern "C" fn reclaim_new_global_ref(object: usize) -> u64 {
    let result = runtime().and_then(|rt| {
        let handle = rt.add_global_ref(ObjectAddress::new(object))?;
        Ok(handle.map_or(0, NativeRef::as_raw))
    });
    report("reclaim_new_global_ref", result, 0)
}

/// Weak global reference to `object`, pinning it; 0 for a null object or on failure
#[no_mangle]
pub extern "C" fn reclaim_new_weak_global_ref(object: usize) -> u64 {
    let result = runtime().and_then(|rt| {
        let handle = rt.add_weak_global_ref(ObjectAddress::new(object))?;
        Ok(handle.map_or(0, NativeRef::as_raw))
    });
    report("reclaim_new_weak_global_ref", result, 0)
}

#[no_mangle]
pub extern "C" fn reclaim_delete_global_ref(handle: u64) -> bool {
    match (RUNTIME.get(), NativeRef::from_raw(handle)) {
        (Some(rt), Some(handle)) => rt.delete_global_ref(handle),
        _ => false,
    }
}

#[no_mangle]
pub extern "C" fn reclaim_delete_weak_global_ref(handle: u64) -> bool {
    match (RUNTIME.get(), NativeRef::from_raw(handle)) {
        (Some(rt), Some(handle)) => rt.delete_weak_global_ref(handle),
        _ => false,
    }
}

/// Object behind `handle`; 0 for a cleared weak reference or an unknown handle
#[no_mangle]
pub extern "C" fn reclaim_decode_ref(handle: u64) -> usize {
    let result = (|| -> anyhow::Result<usize> {
        let handle = NativeRef::from_raw(handle).ok_or_else(|| anyhow!("null handle"))?;
        let referent = runtime()?.decode_native_ref(handle)?;
        Ok(referent.map_or(0, ObjectAddress::raw))
    })();
    report("reclaim_decode_ref", result, 0)
}

// ============================================================================
// Entry locking
// ============================================================================

/// App-thread handshake on entry `index`
///
/// Spins while the kernel holds the entry. Pair with [`reclaim_entry_unlock`].
#[no_mangle]
pub extern "C" fn reclaim_entry_lock(index: u32) -> bool {
    let result = entry(index).map(|entry| {
        entry.lock_from_app_thread();
        true
    });
    report("reclaim_entry_lock", result, false)
}

#[no_mangle]
pub extern "C" fn reclaim_entry_unlock(index: u32) -> bool {
    let result = entry(index).map(|entry| {
        entry.unlock_from_app_thread();
        true
    });
    report("reclaim_entry_unlock", result, false)
}

/// Kernel role: take the entry's lock bit; false if already held
#[no_mangle]
pub extern "C" fn reclaim_kernel_try_lock(index: u32) -> bool {
    let result = entry(index).map(TableEntry::try_kernel_lock);
    report("reclaim_kernel_try_lock", result, false)
}

#[no_mangle]
pub extern "C" fn reclaim_kernel_unlock(index: u32) -> bool {
    let result = entry(index).map(|entry| {
        entry.kernel_unlock();
        true
    });
    report("reclaim_kernel_unlock", result, false)
}
