//! Tri-state entry values.

/// Value of a bitmap entry.
///
/// `Null` only exists in nullable bitmaps; a plain bitmap reports every
/// absent key as `False`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitState {
    False,
    True,
    Null,
}

impl BitState {
    /// Returns true for `Null`.
    #[inline]
    pub fn is_null(self) -> bool {
        self == BitState::Null
    }

    /// Returns true for `True`.
    #[inline]
    pub fn is_true(self) -> bool {
        self == BitState::True
    }

    /// Returns the boolean value, or None for `Null`.
    pub fn as_bool(self) -> Option<bool> {
        match self {
            BitState::False => Some(false),
            BitState::True => Some(true),
            BitState::Null => None,
        }
    }
}

impl From<bool> for BitState {
    fn from(value: bool) -> Self {
        if value {
            BitState::True
        } else {
            BitState::False
        }
    }
}

impl From<Option<bool>> for BitState {
    fn from(value: Option<bool>) -> Self {
        value.map_or(BitState::Null, BitState::from)
    }
}

impl std::fmt::Display for BitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BitState::False => write!(f, "False"),
            BitState::True => write!(f, "True"),
            BitState::Null => write!(f, "Null"),
        }
    }
}
