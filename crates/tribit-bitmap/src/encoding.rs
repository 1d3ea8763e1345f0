//! Leaf encodings.
//!
//! A plain leaf stores one bit per key: set means `True`, clear means `False`.
//! A nullable leaf stores a 2-bit field per key, presence in the high bit and
//! value in the low bit:
//! ```text
//!   00 = Null    10 = False    11 = True
//! ```
//!
//! `Plain` and `Nullable` fix the encoding at compile time so the branches on
//! nullability fold away; `Dynamic` reads it from the bitmap.

use crate::constants::{LEAF_WORDS, LEAF_WORDS_NULL, PRESENCE_MASK};
use crate::key::BitmapKey;
use crate::state::BitState;
use tribit_common::{Result, TribitError};

/// Bit-level codec of a leaf.
pub trait Encoding: Copy + std::fmt::Debug + Send + Sync + 'static {
    /// Returns the encoding for a bitmap, or `EncodingMismatch` if this
    /// encoding cannot read it.
    fn for_bitmap(nullable: bool) -> Result<Self>;

    /// Returns true for the 2-bit encoding.
    fn is_nullable(self) -> bool;

    /// Value of a key that has never been written.
    #[inline]
    fn default_state(self) -> BitState {
        if self.is_nullable() {
            BitState::Null
        } else {
            BitState::False
        }
    }

    /// Pages in one leaf run.
    #[inline]
    fn leaf_pages(self) -> u32 {
        if self.is_nullable() {
            2
        } else {
            1
        }
    }

    /// Words in one leaf run.
    #[inline]
    fn leaf_words(self) -> usize {
        if self.is_nullable() {
            LEAF_WORDS_NULL
        } else {
            LEAF_WORDS
        }
    }

    /// Keys covered by one leaf word.
    #[inline]
    fn keys_per_word(self) -> u32 {
        if self.is_nullable() {
            32
        } else {
            64
        }
    }

    /// Word index and slot of a key inside its leaf.
    #[inline]
    fn locate(self, key: BitmapKey) -> (usize, u32) {
        if self.is_nullable() {
            (key.word_null(), key.bit_null())
        } else {
            (key.word(), key.bit())
        }
    }

    /// Bits of `word` marking a non-default entry.
    #[inline]
    fn occupied(self, word: u64) -> u64 {
        if self.is_nullable() {
            word & PRESENCE_MASK
        } else {
            word
        }
    }

    /// Mask keeping the bits of slots at or above `slot`.
    #[inline]
    fn mask_from(self, slot: u32) -> u64 {
        if self.is_nullable() {
            u64::MAX << (2 * slot)
        } else {
            u64::MAX << slot
        }
    }

    /// Slot owning bit position `bit` of a word.
    #[inline]
    fn slot_of(self, bit: u32) -> u32 {
        if self.is_nullable() {
            bit / 2
        } else {
            bit
        }
    }

    /// Reads the state of `slot` in `word`.
    #[inline]
    fn decode(self, word: u64, slot: u32) -> BitState {
        if self.is_nullable() {
            let field = word >> (2 * slot);
            if field & 0x2 == 0 {
                BitState::Null
            } else {
                BitState::from(field & 0x1 != 0)
            }
        } else {
            BitState::from((word >> slot) & 0x1 != 0)
        }
    }

    /// Writes `state` into `slot` of `word`.
    #[inline]
    fn encode(self, word: u64, slot: u32, state: BitState) -> u64 {
        if self.is_nullable() {
            let field: u64 = match state {
                BitState::Null => 0b00,
                BitState::False => 0b10,
                BitState::True => 0b11,
            };
            (word & !(0x3 << (2 * slot))) | (field << (2 * slot))
        } else if state.is_true() {
            word | (1 << slot)
        } else {
            word & !(1 << slot)
        }
    }

    /// Returns true if `state` counts towards a dispatch entry's `active_bits`.
    #[inline]
    fn counts(self, state: BitState) -> bool {
        state != self.default_state()
    }
}

/// One bit per key; absent keys read as `False`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Plain;

/// Two bits per key; absent keys read as `Null`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nullable;

/// Encoding chosen at runtime from the bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dynamic(pub bool);

impl Encoding for Plain {
    fn for_bitmap(nullable: bool) -> Result<Self> {
        if nullable {
            return Err(TribitError::EncodingMismatch { nullable });
        }
        Ok(Plain)
    }

    #[inline(always)]
    fn is_nullable(self) -> bool {
        false
    }
}

impl Encoding for Nullable {
    fn for_bitmap(nullable: bool) -> Result<Self> {
        if !nullable {
            return Err(TribitError::EncodingMismatch { nullable });
        }
        Ok(Nullable)
    }

    #[inline(always)]
    fn is_nullable(self) -> bool {
        true
    }
}

impl Encoding for Dynamic {
    fn for_bitmap(nullable: bool) -> Result<Self> {
        Ok(Dynamic(nullable))
    }

    #[inline(always)]
    fn is_nullable(self) -> bool {
        self.0
    }
}
