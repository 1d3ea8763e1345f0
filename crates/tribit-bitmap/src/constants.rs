//! Bitmap index constants: key partition and on-page layout.

use tribit_common::page::PAGE_WORDS;

// Key partition, most significant field first

/// Bits of the key selecting a root slot.
pub const ROOT_BITS: u32 = 8;

/// Bits of the key selecting a dispatch entry.
pub const DISPATCH_BITS: u32 = 9;

/// Bits of the key selecting a 64-bit word of a plain leaf.
pub const WORD_BITS: u32 = 9;

/// Bits of the key selecting a bit within a plain leaf word.
pub const BIT_BITS: u32 = 6;

/// Bits selecting a 2-bit field within a nullable leaf word (32 fields per word).
pub const BIT_NULL_BITS: u32 = BIT_BITS - 1;

/// Bits selecting a word of a nullable leaf.
pub const WORD_NULL_BITS: u32 = WORD_BITS + 1;

/// Bits of the key addressed inside one leaf.
pub const LEAF_BITS: u32 = WORD_BITS + BIT_BITS;

/// Number of root slots in the root table.
pub const ROOT_COUNT: usize = 1 << ROOT_BITS;

/// Number of entries in a dispatch page.
pub const DISPATCH_COUNT: usize = 1 << DISPATCH_BITS;

/// Number of keys covered by one leaf.
pub const LEAF_KEYS: u32 = 1 << LEAF_BITS;

/// Words of a plain leaf (one page).
pub const LEAF_WORDS: usize = 1 << WORD_BITS;

/// Words of a nullable leaf (two consecutive pages).
pub const LEAF_WORDS_NULL: usize = 1 << WORD_NULL_BITS;

// Root table layout

/// Signature stored in the first two words of every root table.
pub const SIGNATURE: [u8; 16] = *b"TRIBIT_bmap/v01\0";

/// Word holding the root table flags.
pub(crate) const FLAGS_WORD: usize = 2;

/// Flag bit set when the bitmap uses the nullable encoding.
pub(crate) const FLAG_NULLABLE: u64 = 1;

/// First word of the root slot array.
pub(crate) const ROOT_SLOTS_OFFSET: usize = 8;

/// Size of the root table record in bytes.
pub const ROOT_TABLE_SIZE: usize = (ROOT_SLOTS_OFFSET + ROOT_COUNT) * 8;

// Nullable leaf encoding

/// Presence bits of a nullable leaf word (the high bit of every 2-bit field).
pub(crate) const PRESENCE_MASK: u64 = 0xAAAA_AAAA_AAAA_AAAA;

// Static layout checks
const _: () = assert!(ROOT_BITS + DISPATCH_BITS + WORD_BITS + BIT_BITS == 32);
const _: () = assert!(DISPATCH_COUNT == PAGE_WORDS);
const _: () = assert!(LEAF_WORDS == PAGE_WORDS);
const _: () = assert!(ROOT_SLOTS_OFFSET + ROOT_COUNT <= PAGE_WORDS);
const _: () = assert!(LEAF_KEYS <= u16::MAX as u32);
