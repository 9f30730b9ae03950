//! Field Storage
//!
//! Fields are stored as 64-bit atomic words. Narrower fields occupy a byte
//! range inside one word (little-endian placement) and are read and written
//! with masked atomic operations on that word, so every access is a plain
//! safe atomic whatever its width. References are full words holding an
//! [`ObjectAddress`](super::ObjectAddress), zero meaning null.

use crate::error::{ReclaimError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Bytes per field word
pub const WORD_SIZE: usize = 8;

/// Byte offset of a field, counted from the start of the field area
///
/// Held as 64 bits so every word index of a `u32` maps to its own offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldOffset(u64);

impl FieldOffset {
    pub const fn new(offset: u32) -> Self {
        FieldOffset(offset as u64)
    }

    /// Offset of the `index`-th word
    pub const fn of_word(index: u32) -> Self {
        FieldOffset(index as u64 * WORD_SIZE as u64)
    }

    /// Byte offset; saturates where `usize` is narrower, which no field
    /// area can reach
    #[inline]
    pub fn value(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

/// Field value types of every supported width
pub trait Primitive: Copy {
    /// Width in bytes
    const WIDTH: usize;

    fn to_bits(self) -> u64;

    fn from_bits(bits: u64) -> Self;
}

macro_rules! int_primitive {
    ($($ty:ty => $unsigned:ty),* $(,)?) => {
        $(
            impl Primitive for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn to_bits(self) -> u64 {
                    self as $unsigned as u64
                }

                #[inline]
                fn from_bits(bits: u64) -> Self {
                    bits as $unsigned as $ty
                }
            }
        )*
    };
}

int_primitive! {
    u8 => u8,
    i8 => u8,
    u16 => u16,
    i16 => u16,
    i32 => u32,
    u32 => u32,
    i64 => u64,
    u64 => u64,
}

impl Primitive for f32 {
    const WIDTH: usize = 4;

    #[inline]
    fn to_bits(self) -> u64 {
        f32::to_bits(self) as u64
    }

    #[inline]
    fn from_bits(bits: u64) -> Self {
        f32::from_bits(bits as u32)
    }
}

impl Primitive for f64 {
    const WIDTH: usize = 8;

    #[inline]
    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }

    #[inline]
    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }
}

#[inline]
fn load_ordering(volatile: bool) -> Ordering {
    if volatile {
        Ordering::SeqCst
    } else {
        Ordering::Relaxed
    }
}

/// Word indices holding references, sorted
///
/// Shared between an object and every copy of it (swap-out image, swapped-in
/// payload), the way class metadata would be.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceMap(Arc<[u32]>);

impl ReferenceMap {
    pub fn new(mut words: Vec<u32>) -> Self {
        words.sort_unstable();
        words.dedup();
        ReferenceMap(words.into())
    }

    /// No reference fields
    pub fn empty() -> Self {
        ReferenceMap(Arc::from(Vec::new()))
    }

    pub fn word_indices(&self) -> &[u32] {
        &self.0
    }

    pub fn offsets(&self) -> impl Iterator<Item = FieldOffset> + '_ {
        self.0.iter().map(|&w| FieldOffset::of_word(w))
    }

    pub fn is_reference(&self, offset: FieldOffset) -> bool {
        if offset.value() % WORD_SIZE != 0 {
            return false;
        }
        u32::try_from(offset.value() / WORD_SIZE)
            .map_or(false, |word| self.0.binary_search(&word).is_ok())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Field area of an object
pub struct Fields {
    words: Box<[AtomicU64]>,
}

impl Fields {
    /// `bytes` of zeroed fields, rounded up to whole words
    pub fn zeroed(bytes: usize) -> Self {
        let count = bytes.div_ceil(WORD_SIZE);
        Self {
            words: (0..count).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Fields initialized from raw words
    pub fn from_words(words: &[u64]) -> Self {
        Self {
            words: words.iter().map(|&w| AtomicU64::new(w)).collect(),
        }
    }

    /// Copy of every word
    pub fn snapshot(&self) -> Vec<u64> {
        self.words.iter().map(|w| w.load(Ordering::SeqCst)).collect()
    }

    /// Zero every word
    pub fn clear(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::SeqCst);
        }
    }

    pub fn byte_len(&self) -> usize {
        self.words.len() * WORD_SIZE
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Word holding `width` bytes at `offset`, and the bit shift inside it
    fn locate(&self, offset: FieldOffset, width: usize) -> Result<(&AtomicU64, u32)> {
        let offset = offset.value();
        if offset % width != 0 {
            return Err(ReclaimError::MisalignedField { offset, width });
        }
        let word = self
            .words
            .get(offset / WORD_SIZE)
            .ok_or(ReclaimError::FieldOutOfBounds {
                offset,
                size: self.byte_len(),
            })?;
        Ok((word, ((offset % WORD_SIZE) * 8) as u32))
    }

    /// Load a field of type `T`
    #[inline]
    pub fn load<T: Primitive>(&self, offset: FieldOffset, volatile: bool) -> Result<T> {
        let (word, shift) = self.locate(offset, T::WIDTH)?;
        let bits = word.load(load_ordering(volatile));
        Ok(T::from_bits(bits >> shift))
    }

    /// Store a field of type `T`
    #[inline]
    pub fn store<T: Primitive>(&self, offset: FieldOffset, value: T, volatile: bool) -> Result<()> {
        let (word, shift) = self.locate(offset, T::WIDTH)?;
        let ordering = load_ordering(volatile);
        if T::WIDTH == WORD_SIZE {
            word.store(value.to_bits(), ordering);
            return Ok(());
        }

        let mask = ((1u64 << (T::WIDTH * 8)) - 1) << shift;
        let bits = (value.to_bits() << shift) & mask;
        let _ = word.fetch_update(ordering, load_ordering(volatile), |current| {
            Some((current & !mask) | bits)
        });
        Ok(())
    }

    /// Compare-and-set a whole word
    ///
    /// Returns true if the word held `expected` and now holds `new`. The
    /// weak form may fail spuriously.
    pub fn compare_exchange(
        &self,
        offset: FieldOffset,
        expected: u64,
        new: u64,
        weak: bool,
    ) -> Result<bool> {
        let (word, _) = self.locate(offset, WORD_SIZE)?;
        let result = if weak {
            word.compare_exchange_weak(expected, new, Ordering::SeqCst, Ordering::SeqCst)
        } else {
            word.compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
        };
        Ok(result.is_ok())
    }

    /// Replace a whole word, returning the previous value
    pub fn swap(&self, offset: FieldOffset, new: u64) -> Result<u64> {
        let (word, _) = self.locate(offset, WORD_SIZE)?;
        Ok(word.swap(new, Ordering::SeqCst))
    }
}

impl std::fmt::Debug for Fields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fields")
            .field("bytes", &self.byte_len())
            .finish()
    }
}
