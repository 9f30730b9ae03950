//! Page helpers
//!
//! The table records how many pages a swapped payload occupies. Counts are
//! stored in 16 bits, so conversions saturate.

use std::sync::atomic::{AtomicUsize, Ordering};

/// System page size (cached)
static SYSTEM_PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Get system page size, cached after the first query
pub fn get_page_size() -> usize {
    let cached = SYSTEM_PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }

    let size = page_size::get();
    SYSTEM_PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

/// Convert bytes to pages (round up)
pub fn bytes_to_pages(bytes: usize) -> usize {
    bytes.div_ceil(get_page_size())
}

/// Page count for a payload of `bytes`, saturating at `u16::MAX`
pub fn page_count_for(bytes: usize) -> u16 {
    u16::try_from(bytes_to_pages(bytes)).unwrap_or(u16::MAX)
}

/// Align size to page boundary (round up)
pub fn align_to_page(size: usize) -> usize {
    let ps = get_page_size();
    (size + ps - 1) & !(ps - 1)
}
