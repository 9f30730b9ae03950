//! Live Bitmap - Reachability Marks for a Space
//!
//! One bit per `granularity` bytes of a space's address range. The tracer
//! sets bits; sweeps free every object whose bit is clear.
//!
//! ```text
//! Space: 64MB, granularity 16 bytes -> 4M bits -> 512KB of bitmap
//!
//! Object at base + 0x40:
//! - Bit index: 0x40 / 16 = 4
//! - Word index: 4 / 64 = 0, bit 4
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Liveness bitmap over one address range
pub struct LiveBitmap {
    bits: Vec<AtomicU64>,
    base_address: usize,
    covered: usize,
    granularity: usize,
}

impl LiveBitmap {
    /// Bitmap covering `covered` bytes from `base_address`
    pub fn new(base_address: usize, covered: usize, granularity: usize) -> Self {
        debug_assert!(granularity.is_power_of_two());
        let bit_count = covered.div_ceil(granularity);
        let word_count = bit_count.div_ceil(64);
        Self {
            bits: (0..word_count).map(|_| AtomicU64::new(0)).collect(),
            base_address,
            covered,
            granularity,
        }
    }

    /// Whether `address` falls in the covered range
    pub fn covers(&self, address: usize) -> bool {
        address >= self.base_address && address - self.base_address < self.covered
    }

    fn indices(&self, address: usize) -> Option<(usize, u32)> {
        if !self.covers(address) {
            return None;
        }
        let bit = (address - self.base_address) / self.granularity;
        Some((bit / 64, (bit % 64) as u32))
    }

    /// Set the bit for `address`
    ///
    /// Returns true if this call set it.
    pub fn mark(&self, address: usize) -> bool {
        match self.indices(address) {
            Some((word, bit)) => {
                let mask = 1u64 << bit;
                self.bits[word].fetch_or(mask, Ordering::AcqRel) & mask == 0
            }
            None => false,
        }
    }

    pub fn is_marked(&self, address: usize) -> bool {
        match self.indices(address) {
            Some((word, bit)) => self.bits[word].load(Ordering::Acquire) & (1u64 << bit) != 0,
            None => false,
        }
    }

    pub fn clear(&self) {
        for word in &self.bits {
            word.store(0, Ordering::Relaxed);
        }
    }

    pub fn count_marked(&self) -> usize {
        self.bits
            .iter()
            .map(|word| word.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_query() {
        let bitmap = LiveBitmap::new(0x1000, 4096, 16);
        assert!(bitmap.mark(0x1000));
        assert!(!bitmap.mark(0x1000));
        assert!(bitmap.mark(0x1000 + 64 * 16));
        assert!(bitmap.is_marked(0x1000));
        assert!(!bitmap.is_marked(0x1010));
        assert_eq!(bitmap.count_marked(), 2);

        bitmap.clear();
        assert_eq!(bitmap.count_marked(), 0);
    }

    #[test]
    fn test_out_of_range() {
        let bitmap = LiveBitmap::new(0x1000, 4096, 16);
        assert!(!bitmap.covers(0x0fff));
        assert!(!bitmap.covers(0x2000));
        assert!(!bitmap.mark(0x2000));
        assert!(!bitmap.is_marked(0x2000));
    }
}
