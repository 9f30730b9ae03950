//! Error Module - Reclaim Error Types
//!
//! Defines all error types used by the swapping subsystem.
//!
//! # Error Categories
//!
//! ## Table Errors
//! - `TableUnavailable` - Backing storage for the reclamation table missing
//! - `TableFull` - Every entry is occupied
//! - `InvalidEntry` - Handle outside the table
//!
//! ## Swap Errors
//! - `SwapInFailed` - Secondary storage could not produce the payload
//! - `SwapOutFailed` - Payload could not be written out
//! - `NotSwappable` - Object carries the sticky no-swap flag
//!
//! ## Object Errors
//! - `InvalidAddress` - No object at the address
//! - `FieldOutOfBounds` / `MisalignedField` - Bad field offset
//! - `OutOfMemory` - Space exhausted
//!
//! ## State Errors
//! - `Configuration` - Invalid configuration
//! - `InvalidState` - Operation not allowed in current state
//! - `Internal` - Broken internal invariant

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for all reclaim operations
///
/// # Examples
///
/// ```rust
/// use reclaim::error::ReclaimError;
///
/// fn handle_error(err: ReclaimError) {
///     match err {
///         ReclaimError::TableFull { capacity } => {
///             eprintln!("no free entry among {}", capacity);
///         }
///         ReclaimError::SwapInFailed { entry, reason } => {
///             eprintln!("entry {} could not be populated: {}", entry, reason);
///         }
///         _ => {
///             eprintln!("Other error: {}", err);
///         }
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum ReclaimError {
    /// Reclamation table has no backing storage
    ///
    /// **When returned:** `create_table` could not map memory, or was asked
    /// for zero entries, and the table was used anyway.
    ///
    /// **Recovery strategy:** Run without swapping
    #[error("Reclamation table unavailable: {0}")]
    TableUnavailable(String),

    /// No free entry left in the table
    ///
    /// **When returned:** `create_entry` scanned every slot and found all occupied
    ///
    /// **Recovery strategy:** Skip the swap-out; retry after objects are freed
    #[error("Reclamation table full: all {capacity} entries occupied")]
    TableFull { capacity: usize },

    /// Entry handle does not name a slot of this table
    #[error("Invalid table entry {index} (capacity {capacity})")]
    InvalidEntry { index: usize, capacity: usize },

    /// Swap-in failed
    ///
    /// **When returned:** The backend could not read the payload of a
    /// non-resident entry during a redirected access.
    ///
    /// **Recovery strategy:** The entry stays non-resident and the
    /// handshake is released, so a later access retries the swap-in.
    #[error("Swap-in failed for entry {entry}: {reason}")]
    SwapInFailed { entry: usize, reason: String },

    /// Swap-out failed
    ///
    /// **When returned:** The backend rejected the payload. The entry
    /// reserved for the object is released again.
    #[error("Swap-out failed for object {address:#x}: {reason}")]
    SwapOutFailed { address: usize, reason: String },

    /// Object is excluded from swapping
    ///
    /// **When returned:** Swap-out was requested for an object that carries
    /// the no-swap flag (zygote large object, native global reference).
    #[error("Object {address:#x} is excluded from swapping")]
    NotSwappable { address: usize },

    /// No object lives at the address
    #[error("Invalid object address: {address:#x}")]
    InvalidAddress { address: usize },

    /// Field access past the end of the object
    #[error("Field offset {offset} out of bounds for {size} bytes of fields")]
    FieldOutOfBounds { offset: usize, size: usize },

    /// Field offset not aligned to the access width
    #[error("Misaligned field offset {offset} for {width}-byte access")]
    MisalignedField { offset: usize, width: usize },

    /// Space exhausted
    #[error("Out of memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory { requested: usize, available: usize },

    /// Secondary storage error outside of swap-in/out
    #[error("Storage error: {0}")]
    Storage(String),

    /// Native reference handle is unknown or was deleted
    #[error("Invalid native reference {0:#x}")]
    InvalidNativeRef(u64),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation not allowed in the current state
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Broken internal invariant
    ///
    /// **When returned:** Indicates a bug, never expected in correct operation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReclaimError {
    /// Check if the caller can reasonably retry or degrade
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ReclaimError::TableFull { .. }
                | ReclaimError::SwapInFailed { .. }
                | ReclaimError::SwapOutFailed { .. }
                | ReclaimError::NotSwappable { .. }
                | ReclaimError::OutOfMemory { .. }
        )
    }

    /// Check if this error indicates a bug in the code
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            ReclaimError::InvalidEntry { .. } | ReclaimError::Internal(_)
        )
    }

    pub(crate) fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        ReclaimError::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl From<ConfigError> for ReclaimError {
    fn from(err: ConfigError) -> Self {
        ReclaimError::Configuration(err.to_string())
    }
}

/// Result type alias for reclaim operations
pub type Result<T> = std::result::Result<T, ReclaimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ReclaimError::TableFull { capacity: 4 }.is_recoverable());
        assert!(ReclaimError::SwapInFailed {
            entry: 1,
            reason: "io".into()
        }
        .is_recoverable());
        assert!(!ReclaimError::Internal("x".into()).is_recoverable());
        assert!(ReclaimError::Internal("x".into()).is_bug());
        assert!(ReclaimError::InvalidEntry {
            index: 9,
            capacity: 4
        }
        .is_bug());
        assert!(!ReclaimError::NotSwappable { address: 0x10 }.is_bug());
    }

    #[test]
    fn test_display() {
        let err = ReclaimError::NotSwappable { address: 0x1000 };
        assert_eq!(err.to_string(), "Object 0x1000 is excluded from swapping");

        let err = ReclaimError::from(ConfigError::InvalidTableSize("zero".into()));
        assert!(err.to_string().contains("zero"));
    }
}
