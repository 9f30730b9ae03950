//! Payload - The Fields of a Live Object
//!
//! A payload is either allocated directly in a space or owned by a stub
//! after a swap-in. [`PayloadImage`] is the plain-data copy handed to a
//! swap backend.

use super::fields::{Fields, ReferenceMap};
use super::header::{ObjectHeader, HEADER_SIZE};
use serde::{Deserialize, Serialize};

/// Header plus field area
pub struct Payload {
    header: ObjectHeader,
    fields: Fields,
    references: ReferenceMap,
}

impl Payload {
    /// Zeroed object with `field_bytes` bytes of fields
    pub fn new(class_id: u32, field_bytes: usize, references: ReferenceMap) -> Self {
        Self {
            header: ObjectHeader::new(class_id),
            fields: Fields::zeroed(field_bytes),
            references,
        }
    }

    #[inline]
    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    #[inline]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn references(&self) -> &ReferenceMap {
        &self.references
    }

    /// Object size in bytes, header included
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.fields.byte_len()
    }

    /// Plain-data copy for secondary storage
    pub fn image(&self) -> PayloadImage {
        PayloadImage {
            class_id: self.header.class_id(),
            access_bits: self.header.access_bits(),
            words: self.fields.snapshot(),
            reference_words: self.references.word_indices().to_vec(),
        }
    }

    /// Rebuild a payload from its image
    pub fn from_image(image: PayloadImage) -> Self {
        let header = ObjectHeader::new(image.class_id);
        header.restore_access_bits(image.access_bits);
        Self {
            header,
            fields: Fields::from_words(&image.words),
            references: ReferenceMap::new(image.reference_words),
        }
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload")
            .field("header", &self.header)
            .field("size", &self.size())
            .field("references", &self.references.len())
            .finish()
    }
}

/// Serializable copy of a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadImage {
    pub class_id: u32,
    pub access_bits: u32,
    pub words: Vec<u64>,
    pub reference_words: Vec<u32>,
}

impl PayloadImage {
    /// Bytes the object occupies once restored
    pub fn object_size(&self) -> usize {
        HEADER_SIZE + self.words.len() * super::fields::WORD_SIZE
    }
}
