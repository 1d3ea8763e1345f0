//! Page structures for tribit storage.

use serde::{Deserialize, Serialize};

/// Page size in bytes (4 KB).
pub const PAGE_SIZE: usize = 4 * 1024;

/// Number of 64-bit words per page.
pub const PAGE_WORDS: usize = PAGE_SIZE / 8;

/// In-memory page image, addressed as little-endian 64-bit words.
pub type Page = [u64; PAGE_WORDS];

/// Opaque identifier of a page (or of the first page of a run) in a page store.
///
/// Page number 0 is never allocated, so `PageHandle(0)` doubles as the null
/// link in on-page structures.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PageHandle(pub u32);

impl PageHandle {
    /// The null handle.
    pub const NULL: PageHandle = PageHandle(0);

    /// Returns true if this is the null handle.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the handle of the `index`-th page of the run starting here.
    #[inline]
    pub const fn page(self, index: u32) -> PageHandle {
        PageHandle(self.0 + index)
    }

    /// Returns the handle as a raw page number.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for PageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pg:{}", self.0)
    }
}

/// Serializes a page image to its on-disk byte layout.
pub fn page_to_bytes(page: &Page, buf: &mut [u8; PAGE_SIZE]) {
    for (chunk, word) in buf.chunks_exact_mut(8).zip(page.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
}

/// Deserializes a page image from its on-disk byte layout.
pub fn page_from_bytes(buf: &[u8; PAGE_SIZE], page: &mut Page) {
    for (word, chunk) in page.iter_mut().zip(buf.chunks_exact(8)) {
        *word = u64::from_le_bytes([
            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
        ]);
    }
}
