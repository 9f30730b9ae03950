//! Swap Backend - Secondary Storage Boundary
//!
//! The backend owns the byte format and I/O of swapped payloads. The core
//! only ever sees the number of bytes written (to derive a page count) and
//! whether a read succeeded.

use crate::error::{ReclaimError, Result};
use crate::object::{Payload, PayloadImage};
use crate::table::EntryHandle;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Secondary storage for evicted payloads, keyed by table entry
pub trait SwapBackend: Send + Sync {
    /// Persist `payload` for `entry`; returns bytes written
    fn write_out(&self, entry: EntryHandle, payload: &Payload) -> Result<usize>;

    /// Produce the payload stored for `entry`
    fn read_in(&self, entry: EntryHandle) -> Result<Payload>;

    /// Drop whatever is stored for `entry`
    fn discard(&self, entry: EntryHandle);

    /// Name for diagnostics
    fn name(&self) -> &str {
        "backend"
    }
}

/// Backend keeping JSON-encoded payload images in memory
#[derive(Default)]
pub struct MemoryBackend {
    images: RwLock<FxHashMap<EntryHandle, Vec<u8>>>,
    bytes_stored: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored images
    pub fn len(&self) -> usize {
        self.images.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.read().is_empty()
    }

    /// Total encoded bytes held
    pub fn bytes_stored(&self) -> usize {
        self.bytes_stored.load(Ordering::Relaxed)
    }

    pub fn contains(&self, entry: EntryHandle) -> bool {
        self.images.read().contains_key(&entry)
    }
}

impl SwapBackend for MemoryBackend {
    fn write_out(&self, entry: EntryHandle, payload: &Payload) -> Result<usize> {
        let encoded = serde_json::to_vec(&payload.image())
            .map_err(|e| ReclaimError::Storage(format!("encode entry {}: {}", entry, e)))?;
        let written = encoded.len();

        if let Some(old) = self.images.write().insert(entry, encoded) {
            self.bytes_stored.fetch_sub(old.len(), Ordering::Relaxed);
        }
        self.bytes_stored.fetch_add(written, Ordering::Relaxed);
        Ok(written)
    }

    fn read_in(&self, entry: EntryHandle) -> Result<Payload> {
        let images = self.images.read();
        let encoded = images.get(&entry).ok_or_else(|| ReclaimError::SwapInFailed {
            entry: entry.index(),
            reason: "no image stored for entry".to_string(),
        })?;
        let image: PayloadImage =
            serde_json::from_slice(encoded).map_err(|e| ReclaimError::SwapInFailed {
                entry: entry.index(),
                reason: format!("corrupt image: {}", e),
            })?;
        Ok(Payload::from_image(image))
    }

    fn discard(&self, entry: EntryHandle) {
        if let Some(old) = self.images.write().remove(&entry) {
            self.bytes_stored.fetch_sub(old.len(), Ordering::Relaxed);
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}
