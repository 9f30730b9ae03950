//! Configuration Module - Swapping Parameters
//!
//! Manages the tunables of the swapping subsystem: table capacity, the
//! large-object threshold, space sizes and the policy applied when a
//! swap-in cannot be satisfied.

use std::str::FromStr;

const KB: usize = 1024;
const MB: usize = 1024 * KB;

/// Upper bound on table entries; handles are 32-bit.
pub const MAX_TABLE_ENTRIES: usize = 1 << 24;

/// What a redirected access does when the backend cannot produce a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapInFailurePolicy {
    /// Return `ReclaimError::SwapInFailed` from the accessor
    #[default]
    Propagate,
    /// Log and abort the process
    Abort,
}

impl FromStr for SwapInFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "propagate" => Ok(SwapInFailurePolicy::Propagate),
            "abort" => Ok(SwapInFailurePolicy::Abort),
            other => Err(ConfigError::InvalidPolicy(other.to_string())),
        }
    }
}

/// Main configuration for the swapping subsystem
///
/// # Examples
///
/// ```rust
/// use reclaim::SwapConfig;
///
/// let config = SwapConfig {
///     table_entries: 1024,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SwapConfig {
    /// Number of reclamation table entries
    ///
    /// Bounds how many objects can be swapped out at once.
    /// Default: 4096
    pub table_entries: usize,

    /// Objects of at least this many bytes go to the large object space
    ///
    /// Default: 12KB
    pub large_object_threshold: usize,

    /// Address range reserved for the main space
    ///
    /// Default: 64MB
    pub main_space_bytes: usize,

    /// Address range reserved for the large object space
    ///
    /// Default: 256MB
    pub large_space_bytes: usize,

    /// Behavior when a swap-in fails
    pub swap_in_failure: SwapInFailurePolicy,

    /// Polls of a held kernel lock before the handshake logs a warning
    ///
    /// The handshake keeps spinning after the warning.
    /// Default: 1,000,000
    pub stall_warn_polls: u64,

    /// Mutator threads registered with the safepoint at startup
    pub mutator_threads: usize,

    /// Echo structured events to the console
    pub verbose: bool,

    /// Collect counters and histograms
    pub stats_enabled: bool,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            table_entries: 4096,
            large_object_threshold: 12 * KB,
            main_space_bytes: 64 * MB,
            large_space_bytes: 256 * MB,
            swap_in_failure: SwapInFailurePolicy::Propagate,
            stall_warn_polls: 1_000_000,
            mutator_threads: 0,
            verbose: false,
            stats_enabled: true,
        }
    }
}

impl SwapConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table_entries == 0 {
            return Err(ConfigError::InvalidTableSize(
                "table_entries must be > 0".to_string(),
            ));
        }

        if self.table_entries > MAX_TABLE_ENTRIES {
            return Err(ConfigError::InvalidTableSize(format!(
                "table_entries must be <= {}",
                MAX_TABLE_ENTRIES
            )));
        }

        if self.large_object_threshold < crate::object::HEADER_SIZE + 8 {
            return Err(ConfigError::InvalidThreshold(
                "large_object_threshold must exceed the smallest object".to_string(),
            ));
        }

        if self.main_space_bytes < self.large_object_threshold {
            return Err(ConfigError::InvalidSpaceSize(
                "main_space_bytes must hold at least one object below the threshold".to_string(),
            ));
        }

        if self.large_space_bytes < self.large_object_threshold {
            return Err(ConfigError::InvalidSpaceSize(
                "large_space_bytes must hold at least one large object".to_string(),
            ));
        }

        if self.stall_warn_polls == 0 {
            return Err(ConfigError::InvalidThreshold(
                "stall_warn_polls must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - RECLAIM_TABLE_ENTRIES
    /// - RECLAIM_LARGE_OBJECT_THRESHOLD
    /// - RECLAIM_SWAP_IN_FAILURE (`propagate` or `abort`)
    /// - RECLAIM_STALL_WARN_POLLS
    /// - RECLAIM_VERBOSE
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RECLAIM_TABLE_ENTRIES") {
            if let Ok(entries) = val.parse::<usize>() {
                config.table_entries = entries;
            }
        }

        if let Ok(val) = std::env::var("RECLAIM_LARGE_OBJECT_THRESHOLD") {
            if let Ok(bytes) = val.parse::<usize>() {
                config.large_object_threshold = bytes;
            }
        }

        if let Ok(val) = std::env::var("RECLAIM_SWAP_IN_FAILURE") {
            if let Ok(policy) = val.parse::<SwapInFailurePolicy>() {
                config.swap_in_failure = policy;
            }
        }

        if let Ok(val) = std::env::var("RECLAIM_STALL_WARN_POLLS") {
            if let Ok(polls) = val.parse::<u64>() {
                config.stall_warn_polls = polls;
            }
        }

        if let Ok(val) = std::env::var("RECLAIM_VERBOSE") {
            config.verbose = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Bytes of mapping the reclamation table needs
    pub fn table_bytes(&self) -> usize {
        self.table_entries
            .saturating_mul(std::mem::size_of::<crate::table::TableEntry>())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid table size: {0}")]
    InvalidTableSize(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Invalid space size: {0}")]
    InvalidSpaceSize(String),

    #[error("Invalid swap-in failure policy: {0}")]
    InvalidPolicy(String),
}
