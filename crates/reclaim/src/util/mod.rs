//! Util Module - Shared Utilities
//!
//! Page-size helpers, alignment and thread identity used throughout the crate.

pub mod page;
pub mod thread;

pub use page::{bytes_to_pages, get_page_size, page_count_for};
pub use thread::ThreadId;

/// Power-of-two alignment arithmetic
pub struct Alignment;

impl Alignment {
    /// Object alignment in the main space
    pub const OBJECT: usize = 16;

    /// Round `value` up to a multiple of `alignment`
    #[inline]
    pub const fn align_up(value: usize, alignment: usize) -> usize {
        debug_assert!(alignment.is_power_of_two());
        (value + alignment - 1) & !(alignment - 1)
    }

    #[inline]
    pub const fn is_aligned(value: usize, alignment: usize) -> bool {
        debug_assert!(alignment.is_power_of_two());
        value & (alignment - 1) == 0
    }
}

/// Size units
pub mod constants {
    pub const KB: usize = 1 << 10;
    pub const MB: usize = 1 << 20;
}
