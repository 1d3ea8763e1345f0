//! Hierarchical, page-backed, tri-state bitmap index.
//!
//! Maps 32-bit keys to `Null`, `False` or `True`, stored in pages of a
//! [`PageStore`](tribit_pager::PageStore):
//! - Three-level radix layout: root table, dispatch pages, leaves
//! - Plain (1 bit per key) and nullable (2 bits per key) leaf encodings
//! - Lazy allocation and immediate release of empty pages
//! - Ordered enumeration that skips unmapped subtrees, in borrowing and
//!   mutation-tolerant flavours

mod bitmap;
pub mod constants;
mod encoding;
mod enumerator;
mod key;
mod layout;
mod state;

pub use bitmap::{Bitmap, BitmapPages, BitmapStats};
pub use encoding::{Dynamic, Encoding, Nullable, Plain};
pub use enumerator::{Cursor, Enumerator};
pub use key::BitmapKey;
pub use layout::DispatchEntry;
pub use state::BitState;
