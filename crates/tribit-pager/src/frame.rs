//! Buffer frame management.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tribit_common::page::{Page, PageHandle, PAGE_WORDS};

/// Sentinel value indicating no page is loaded in the frame.
const NO_PAGE: u32 = u32::MAX;

/// Unique identifier for a frame in the frame pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl FrameId {
    /// Invalid frame ID.
    pub const INVALID: FrameId = FrameId(u32::MAX);

    /// Returns true if this is a valid frame ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// A frame in the pool holding a single resident page.
pub struct BufferFrame {
    /// Frame identifier.
    frame_id: FrameId,
    /// Page currently stored in this frame (NO_PAGE = none).
    page: AtomicU32,
    /// Page image.
    data: RwLock<Box<Page>>,
    /// Number of live guards on this page.
    pin_count: AtomicU32,
    /// Whether the page has been modified since it was last written back.
    is_dirty: AtomicBool,
}

impl BufferFrame {
    /// Creates a new empty buffer frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page: AtomicU32::new(NO_PAGE),
            data: RwLock::new(Box::new([0u64; PAGE_WORDS])),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page currently stored in this frame.
    #[inline]
    pub fn page(&self) -> Option<PageHandle> {
        match self.page.load(Ordering::Acquire) {
            NO_PAGE => None,
            raw => Some(PageHandle(raw)),
        }
    }

    /// Sets the page stored in this frame.
    #[inline]
    pub fn set_page(&self, page: Option<PageHandle>) {
        let raw = page.map_or(NO_PAGE, |h| h.0);
        self.page.store(raw, Ordering::Release);
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the previous pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel)
    }

    /// Decrements the pin count.
    ///
    /// Returns the new pin count.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            // Underflow protection: restore to 0
            self.pin_count.store(0, Ordering::Release);
            return 0;
        }
        prev - 1
    }

    /// Returns true if this frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    /// Returns true if this frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Marks this frame as dirty or clean.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Reads the page data.
    #[inline]
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Box<Page>> {
        self.data.read()
    }

    /// Writes to the page data.
    #[inline]
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Box<Page>> {
        self.data.write()
    }

    /// Tries to take the data lock exclusively without blocking.
    #[inline]
    pub fn try_write_data(&self) -> Option<parking_lot::RwLockWriteGuard<'_, Box<Page>>> {
        self.data.try_write()
    }

    /// Copies a page image into the frame.
    #[inline]
    pub fn copy_from(&self, src: &Page) {
        self.data.write().copy_from_slice(src);
    }

    /// Detaches the frame from its page and zeroes `data`, which must be
    /// this frame's data held under the write lock.
    ///
    /// The pin count is left alone: a reader that pinned the frame through
    /// a stale table lookup still owns its pin and releases it after it
    /// notices the page changed.
    #[inline]
    pub fn reset(&self, data: &mut Page) {
        self.page.store(NO_PAGE, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        data.fill(0);
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("frame_id", &self.frame_id)
            .field("page", &self.page())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .finish()
    }
}
