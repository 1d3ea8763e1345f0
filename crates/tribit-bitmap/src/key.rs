//! Entry key decomposition.
//!
//! Key layout (MSB to LSB):
//! ```text
//! +--------+------------+--------+-------+
//! | root 8 | dispatch 9 | word 9 | bit 6 |   plain leaf
//! +--------+------------+--------+-------+
//! | root 8 | dispatch 9 | word 10  | b 5 |   nullable leaf (2 bits per key)
//! +--------+------------+----------+-----+
//! ```

use crate::constants::{
    BIT_BITS, BIT_NULL_BITS, DISPATCH_BITS, LEAF_BITS, WORD_BITS, WORD_NULL_BITS,
};

/// A 32-bit entry key split into its index fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BitmapKey(pub u32);

impl BitmapKey {
    /// Builds a key from its root slot, dispatch entry and offset inside the leaf.
    #[inline]
    pub const fn from_parts(root: usize, dispatch: usize, leaf_offset: u32) -> Self {
        Self(
            ((root as u32) << (DISPATCH_BITS + LEAF_BITS))
                | ((dispatch as u32) << LEAF_BITS)
                | (leaf_offset & mask(LEAF_BITS)),
        )
    }

    /// Root slot index.
    #[inline]
    pub const fn root(self) -> usize {
        (self.0 >> (DISPATCH_BITS + LEAF_BITS)) as usize
    }

    /// Dispatch entry index.
    #[inline]
    pub const fn dispatch(self) -> usize {
        ((self.0 >> LEAF_BITS) & mask(DISPATCH_BITS)) as usize
    }

    /// Word index in a plain leaf.
    #[inline]
    pub const fn word(self) -> usize {
        ((self.0 >> BIT_BITS) & mask(WORD_BITS)) as usize
    }

    /// Bit offset in a plain leaf word.
    #[inline]
    pub const fn bit(self) -> u32 {
        self.0 & mask(BIT_BITS)
    }

    /// Word index in a nullable leaf.
    #[inline]
    pub const fn word_null(self) -> usize {
        ((self.0 >> BIT_NULL_BITS) & mask(WORD_NULL_BITS)) as usize
    }

    /// Field index (of 2-bit fields) in a nullable leaf word.
    #[inline]
    pub const fn bit_null(self) -> u32 {
        self.0 & mask(BIT_NULL_BITS)
    }

    /// Offset of the key within its leaf.
    #[inline]
    pub const fn leaf_offset(self) -> u32 {
        self.0 & mask(LEAF_BITS)
    }

    /// Returns the raw key.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for BitmapKey {
    fn from(key: u32) -> Self {
        Self(key)
    }
}

impl std::fmt::Display for BitmapKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}/{}/{})",
            self.0,
            self.root(),
            self.dispatch(),
            self.leaf_offset()
        )
    }
}

#[inline]
const fn mask(bits: u32) -> u32 {
    (1 << bits) - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DISPATCH_COUNT, LEAF_KEYS, ROOT_COUNT};

    #[test]
    fn test_key_fields() {
        let key = BitmapKey(0xAB_u32 << 24 | 0x1F3 << 15 | 0x15A << 6 | 0x2D);

        assert_eq!(key.root(), 0xAB);
        assert_eq!(key.dispatch(), 0x1F3);
        assert_eq!(key.word(), 0x15A);
        assert_eq!(key.bit(), 0x2D);
        assert_eq!(key.leaf_offset(), 0x15A << 6 | 0x2D);
    }

    #[test]
    fn test_key_nullable_fields() {
        let key = BitmapKey(70);

        // 32 keys per nullable word
        assert_eq!(key.word_null(), 2);
        assert_eq!(key.bit_null(), 6);
        assert_eq!(key.word(), 1);
        assert_eq!(key.bit(), 6);
    }

    #[test]
    fn test_key_extremes() {
        let max = BitmapKey(u32::MAX);
        assert_eq!(max.root(), ROOT_COUNT - 1);
        assert_eq!(max.dispatch(), DISPATCH_COUNT - 1);
        assert_eq!(max.leaf_offset(), LEAF_KEYS - 1);
        assert_eq!(max.word_null(), 1023);
        assert_eq!(max.bit_null(), 31);

        let zero = BitmapKey(0);
        assert_eq!((zero.root(), zero.dispatch(), zero.leaf_offset()), (0, 0, 0));
    }

    #[test]
    fn test_key_from_parts() {
        for raw in [0u32, 1, 32767, 32768, 270_101, 0x00FF_FFFF, 0xFFFF_0001, u32::MAX] {
            let key = BitmapKey(raw);
            let rebuilt = BitmapKey::from_parts(key.root(), key.dispatch(), key.leaf_offset());
            assert_eq!(rebuilt, key);
        }
    }

    #[test]
    fn test_key_display() {
        assert_eq!(BitmapKey(32769).to_string(), "32769 (0/1/1)");
    }
}
