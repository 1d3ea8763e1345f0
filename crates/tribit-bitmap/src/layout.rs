//! On-page layouts of the root table and dispatch pages.
//!
//! Root table (one page, 64-bit words):
//! ```text
//! +-----------------------+  word 0
//! | signature (16 bytes)  |
//! +-----------------------+  word 2
//! | flags (bit 0 = null)  |
//! +-----------------------+  word 3..8
//! | reserved              |
//! +-----------------------+  word 8
//! | root slots [256]      |  one page handle per word, 0 = empty
//! +-----------------------+  word 264
//! ```
//!
//! Dispatch page: 512 words, one [`DispatchEntry`] per word.

use crate::constants::{
    DISPATCH_COUNT, FLAGS_WORD, FLAG_NULLABLE, ROOT_COUNT, ROOT_SLOTS_OFFSET, SIGNATURE,
};
use tribit_common::page::{Page, PageHandle};

/// Accessors for the root table record.
pub(crate) struct RootTable;

impl RootTable {
    /// Writes a fresh root table: signature, flags and empty slots.
    pub fn init(page: &mut Page, nullable: bool) {
        page.fill(0);
        let (lo, hi) = signature_words();
        page[0] = lo;
        page[1] = hi;
        page[FLAGS_WORD] = if nullable { FLAG_NULLABLE } else { 0 };
    }

    /// Returns true if the page carries the bitmap signature.
    pub fn has_signature(page: &Page) -> bool {
        (page[0], page[1]) == signature_words()
    }

    /// Returns the nullable flag.
    pub fn is_nullable(page: &Page) -> bool {
        page[FLAGS_WORD] & FLAG_NULLABLE != 0
    }

    /// Returns the dispatch page handle of a root slot.
    #[inline]
    pub fn slot(page: &Page, index: usize) -> PageHandle {
        PageHandle(page[ROOT_SLOTS_OFFSET + index] as u32)
    }

    /// Sets the dispatch page handle of a root slot.
    #[inline]
    pub fn set_slot(page: &mut Page, index: usize, handle: PageHandle) {
        page[ROOT_SLOTS_OFFSET + index] = handle.as_u32() as u64;
    }

    /// Copies out all root slots.
    pub fn slots(page: &Page) -> [PageHandle; ROOT_COUNT] {
        let mut slots = [PageHandle::NULL; ROOT_COUNT];
        for (i, slot) in slots.iter_mut().enumerate() {
            *slot = Self::slot(page, i);
        }
        slots
    }
}

fn signature_words() -> (u64, u64) {
    let mut lo = [0u8; 8];
    let mut hi = [0u8; 8];
    lo.copy_from_slice(&SIGNATURE[..8]);
    hi.copy_from_slice(&SIGNATURE[8..]);
    (u64::from_le_bytes(lo), u64::from_le_bytes(hi))
}

/// A dispatch page entry: the leaf run and its count of non-default keys.
///
/// Layout (one 64-bit word):
/// - leaf: bits 0..32
/// - active_bits: bits 32..48
/// - reserved: bits 48..64
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchEntry {
    /// Leaf run handle (null = no leaf).
    pub leaf: PageHandle,
    /// Number of non-default keys in the leaf.
    pub active_bits: u16,
}

impl DispatchEntry {
    /// An empty entry.
    pub const EMPTY: DispatchEntry = DispatchEntry {
        leaf: PageHandle::NULL,
        active_bits: 0,
    };

    /// Creates a new entry.
    pub fn new(leaf: PageHandle, active_bits: u16) -> Self {
        Self { leaf, active_bits }
    }

    /// Returns true if there is no leaf and no count.
    pub fn is_empty(&self) -> bool {
        self.leaf.is_null() && self.active_bits == 0
    }

    /// Returns true if the count claims entries but no leaf is mapped.
    pub fn is_corrupted(&self) -> bool {
        self.leaf.is_null() && self.active_bits != 0
    }

    /// Packs the entry into its on-page word.
    pub fn to_word(self) -> u64 {
        self.leaf.as_u32() as u64 | ((self.active_bits as u64) << 32)
    }

    /// Unpacks an entry from its on-page word.
    pub fn from_word(word: u64) -> Self {
        Self {
            leaf: PageHandle(word as u32),
            active_bits: (word >> 32) as u16,
        }
    }

    /// Reads entry `index` of a dispatch page.
    #[inline]
    pub fn read(page: &Page, index: usize) -> Self {
        Self::from_word(page[index])
    }

    /// Writes entry `index` of a dispatch page.
    #[inline]
    pub fn write(self, page: &mut Page, index: usize) {
        page[index] = self.to_word();
    }

    /// Copies out all entries of a dispatch page.
    pub fn read_all(page: &Page) -> Vec<DispatchEntry> {
        page[..DISPATCH_COUNT]
            .iter()
            .map(|&word| Self::from_word(word))
            .collect()
    }

    /// Returns true if every entry of a dispatch page is empty.
    pub fn page_is_empty(page: &Page) -> bool {
        page[..DISPATCH_COUNT].iter().all(|&word| word == 0)
    }
}
