//! Page store for tribit.
//!
//! This crate provides the fixed-size page runs the bitmap index lives in:
//! - The `PageStore` trait with read and write-intent page guards
//! - A fixed-size frame pool with clock eviction and pin counting
//! - Dirty page tracking with write-back to a page file
//! - Unload and transparent reload of page runs

mod file;
mod frame;
mod page_table;
mod pool;
mod replacer;
mod store;

pub use file::PageFile;
pub use frame::{BufferFrame, FrameId};
pub use pool::{EvictedPage, FramePool, FramePoolStats};
pub use replacer::{ClockReplacer, Replacer};
pub use store::{BufferedPageStore, PageReadGuard, PageStore, PageWriteGuard, RootRef};
