//! Frame pool: the in-memory cache of resident pages.

use crate::frame::{BufferFrame, FrameId};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use parking_lot::Mutex;
use tribit_common::page::{Page, PageHandle, PAGE_WORDS};
use tribit_common::{Result, TribitError};

/// A dirty page pushed out of the pool to make room for another.
/// Caller must write this to the page file to prevent data loss.
#[derive(Debug)]
pub struct EvictedPage {
    pub page: PageHandle,
    pub data: Box<Page>,
}

/// Fixed-size pool of page frames.
///
/// Manages:
/// - Page handle to frame mapping (lock-free page table)
/// - Free frame list for new pages
/// - Clock replacement for eviction
/// - Pin counting for concurrent access
pub struct FramePool {
    /// Array of frames.
    frames: Vec<BufferFrame>,
    /// Page handle to frame mapping (lock-free reads).
    page_table: PageTable,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: ClockReplacer,
}

impl FramePool {
    /// Creates a new frame pool with `num_frames` frames.
    pub fn new(num_frames: usize) -> Self {
        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // Popped from the back, so frame 0 is handed out first
        let free_list: Vec<_> = (0..num_frames).rev().map(|i| FrameId(i as u32)).collect();

        Self {
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks if a page is resident.
    pub fn contains(&self, page: PageHandle) -> bool {
        self.page_table.contains(page)
    }

    /// Fetches a resident page and pins it.
    ///
    /// Returns None if the page is not resident. The frame can still be
    /// recycled before its data lock is taken, so callers re-check
    /// [`BufferFrame::page`] under the lock.
    #[inline]
    pub fn fetch_page(&self, page: PageHandle) -> Option<&BufferFrame> {
        let frame_id = self.page_table.get(page)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.pin();
        // The frame may have been recycled between lookup and pin
        if frame.page() != Some(page) {
            frame.unpin();
            return None;
        }
        self.replacer.record_access(frame_id);
        Some(frame)
    }

    /// Allocates a frame for a new page.
    ///
    /// Tries the free list first, then evicts an unpinned frame.
    /// Returns the frame ID and any evicted dirty page that must be flushed.
    fn allocate_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok((frame_id, None));
        }

        for _ in 0..self.frames.len().max(1) {
            let victim_id = self
                .replacer
                .evict(&|fid| self.frames[fid.0 as usize].pin_count() == 0);
            let Some(victim_id) = victim_id else {
                break;
            };
            let frame = &self.frames[victim_id.0 as usize];

            // A reader holds the data lock; it is in use after all
            let Some(mut data) = frame.try_write_data() else {
                continue;
            };
            // Lost a race with a reader that pinned it after the check
            if frame.is_pinned() {
                continue;
            }

            let old_page = frame.page();
            let evicted = match old_page {
                Some(page) if frame.is_dirty() => Some(EvictedPage {
                    page,
                    data: Box::new(**data),
                }),
                _ => None,
            };
            if let Some(page) = old_page {
                self.page_table.remove(page);
                tracing::trace!(%page, frame = %victim_id, dirty = evicted.is_some(), "evicted page");
            }
            frame.reset(&mut data);
            return Ok((victim_id, evicted));
        }

        Err(TribitError::BufferPoolFull)
    }

    /// Installs a zeroed page in the pool.
    ///
    /// If the page is already resident, returns the existing frame.
    /// The page is pinned before being returned.
    ///
    /// Returns (frame, evicted) where evicted contains any dirty page that was
    /// evicted to make room. Caller must write evicted pages back.
    pub fn new_page(&self, page: PageHandle) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        if let Some(frame) = self.fetch_page(page) {
            return Ok((frame, None));
        }

        let (frame_id, evicted) = self.allocate_frame()?;

        let frame = &self.frames[frame_id.0 as usize];
        frame.set_page(Some(page));
        frame.pin();
        self.replacer.record_access(frame_id);

        self.page_table.insert(page, frame_id);

        Ok((frame, evicted))
    }

    /// Loads a page image read from the page file into the pool.
    /// Returns the pinned frame and any evicted dirty page that must be flushed.
    pub fn load_page(
        &self,
        page: PageHandle,
        data: &Page,
    ) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        let (frame, evicted) = self.new_page(page)?;
        frame.copy_from(data);
        Ok((frame, evicted))
    }

    /// Passes a dirty page to `flush_fn` and marks it clean.
    ///
    /// Returns true if the page was flushed.
    pub fn flush_page<F>(&self, page: PageHandle, mut flush_fn: F) -> Result<bool>
    where
        F: FnMut(PageHandle, &Page) -> Result<()>,
    {
        if let Some(frame_id) = self.page_table.get(page) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                flush_fn(page, &data)?;
                frame.set_dirty(false);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Flushes all dirty pages.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_all<F>(&self, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageHandle, &Page) -> Result<()>,
    {
        // Collect first to avoid holding frame guards during iteration
        let mut resident = Vec::new();
        self.page_table.for_each(|page, frame_id| {
            resident.push((page, frame_id));
            true
        });

        let mut flushed = 0;
        for (page, frame_id) in resident {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() && frame.page() == Some(page) {
                let data = frame.read_data();
                flush_fn(page, &data)?;
                frame.set_dirty(false);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Drops a page from the pool without writing it back.
    ///
    /// Returns false if the page is pinned or not resident.
    pub fn delete_page(&self, page: PageHandle) -> bool {
        let Some(frame_id) = self.page_table.get(page) else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];
        if frame.is_pinned() {
            return false;
        }
        let Some(mut data) = frame.try_write_data() else {
            return false;
        };
        if frame.is_pinned() || frame.page() != Some(page) {
            return false;
        }

        self.page_table.remove(page);
        self.replacer.remove(frame_id);
        frame.reset(&mut data);
        drop(data);
        self.free_list.lock().push(frame_id);
        true
    }

    /// Returns statistics about the pool.
    pub fn stats(&self) -> FramePoolStats {
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;

        self.page_table.for_each(|_, frame_id| {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
            true
        });

        FramePoolStats {
            total_frames: self.frames.len(),
            free_frames: self.free_count(),
            used_frames: self.page_table.len(),
            pinned_frames,
            dirty_frames,
        }
    }
}

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePool")
            .field("num_frames", &self.frames.len())
            .field("resident", &self.page_table.len())
            .finish()
    }
}

/// Statistics about the frame pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

/// Returns a zeroed page image on the heap.
pub(crate) fn zeroed_page() -> Box<Page> {
    Box::new([0u64; PAGE_WORDS])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_pool_new() {
        let pool = FramePool::new(10);

        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_frame_pool_new_page() {
        let pool = FramePool::new(10);
        let page = PageHandle(1);

        let (frame, evicted) = pool.new_page(page).unwrap();

        assert!(evicted.is_none());
        assert_eq!(frame.page(), Some(page));
        assert!(frame.is_pinned());
        assert_eq!(pool.free_count(), 9);
        assert_eq!(pool.page_count(), 1);
        assert!(pool.contains(page));
    }

    #[test]
    fn test_frame_pool_fetch_existing() {
        let pool = FramePool::new(10);
        let page = PageHandle(1);

        pool.new_page(page).unwrap().0.unpin();

        let frame = pool.fetch_page(page).unwrap();
        assert_eq!(frame.page(), Some(page));
        assert!(frame.is_pinned());
    }

    #[test]
    fn test_frame_pool_fetch_nonexistent() {
        let pool = FramePool::new(10);
        assert!(pool.fetch_page(PageHandle(1)).is_none());
    }

    #[test]
    fn test_frame_pool_dirty_tracking() {
        let pool = FramePool::new(10);
        let page = PageHandle(1);

        let (frame, _) = pool.new_page(page).unwrap();
        frame.set_dirty(true);
        frame.unpin();

        let frame = pool.fetch_page(page).unwrap();
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_frame_pool_eviction() {
        let pool = FramePool::new(3);

        for i in 1..=3 {
            let page = PageHandle(i);
            pool.new_page(page).unwrap().0.unpin();
        }

        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.page_count(), 3);

        let new_page = PageHandle(99);
        let (_, evicted) = pool.new_page(new_page).unwrap();

        assert!(evicted.is_none());
        assert_eq!(pool.page_count(), 3);
        assert!(pool.contains(new_page));
    }

    #[test]
    fn test_frame_pool_eviction_dirty() {
        let pool = FramePool::new(1);
        let first = PageHandle(1);

        let (frame, _) = pool.new_page(first).unwrap();
        frame.write_data()[0] = 0xAB;
        frame.set_dirty(true);
        frame.unpin();

        let (_, evicted) = pool.new_page(PageHandle(2)).unwrap();

        let evicted = evicted.expect("dirty page should be returned on eviction");
        assert_eq!(evicted.page, first);
        assert_eq!(evicted.data[0], 0xAB);
        assert!(!pool.contains(first));
    }

    #[test]
    fn test_frame_pool_full_all_pinned() {
        let pool = FramePool::new(2);

        pool.new_page(PageHandle(1)).unwrap();
        pool.new_page(PageHandle(2)).unwrap();

        let result = pool.new_page(PageHandle(3));
        assert!(matches!(result, Err(TribitError::BufferPoolFull)));
    }

    #[test]
    fn test_frame_pool_delete_page() {
        let pool = FramePool::new(10);
        let page = PageHandle(1);

        pool.new_page(page).unwrap().0.unpin();

        assert!(pool.delete_page(page));
        assert!(!pool.contains(page));
        assert_eq!(pool.free_count(), 10);
    }

    #[test]
    fn test_frame_pool_delete_pinned_page() {
        let pool = FramePool::new(10);
        let page = PageHandle(1);

        pool.new_page(page).unwrap();

        assert!(!pool.delete_page(page));
        assert!(pool.contains(page));
    }

    #[test]
    fn test_frame_pool_load_page() {
        let pool = FramePool::new(10);
        let page = PageHandle(1);
        let data = [0xABu64; PAGE_WORDS];

        let (frame, _) = pool.load_page(page, &data).unwrap();

        let frame_data = frame.read_data();
        assert_eq!(frame_data[0], 0xAB);
        assert_eq!(frame_data[PAGE_WORDS - 1], 0xAB);
    }

    #[test]
    fn test_frame_pool_flush_page() {
        let pool = FramePool::new(10);
        let page = PageHandle(1);

        let (frame, _) = pool.new_page(page).unwrap();
        frame.set_dirty(true);
        frame.unpin();

        let mut flushed = vec![];
        let result = pool.flush_page(page, |pg, _data| {
            flushed.push(pg);
            Ok(())
        });

        assert!(result.unwrap());
        assert_eq!(flushed, vec![page]);
        assert!(!pool.fetch_page(page).unwrap().is_dirty());
    }

    #[test]
    fn test_frame_pool_flush_all() {
        let pool = FramePool::new(10);

        for i in 1..=5 {
            let page = PageHandle(i);
            let (frame, _) = pool.new_page(page).unwrap();
            frame.set_dirty(true);
            frame.unpin();
        }

        let mut flushed_count = 0;
        let result = pool.flush_all(|_pg, _data| {
            flushed_count += 1;
            Ok(())
        });

        assert_eq!(result.unwrap(), 5);
        assert_eq!(flushed_count, 5);
        assert_eq!(pool.stats().dirty_frames, 0);
    }

    #[test]
    fn test_frame_pool_stats() {
        let pool = FramePool::new(10);

        for i in 0..5 {
            let page = PageHandle(i + 1);
            let (frame, _) = pool.new_page(page).unwrap();
            if i % 2 == 0 {
                frame.set_dirty(true);
                frame.unpin();
            }
        }

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 10);
        assert_eq!(stats.free_frames, 5);
        assert_eq!(stats.used_frames, 5);
        assert_eq!(stats.pinned_frames, 2);
        assert_eq!(stats.dirty_frames, 3);
    }

    #[test]
    fn test_frame_pool_duplicate_new_page() {
        let pool = FramePool::new(10);
        let page = PageHandle(1);

        pool.new_page(page).unwrap().0.unpin();

        let (frame, evicted) = pool.new_page(page).unwrap();

        assert!(evicted.is_none());
        assert_eq!(frame.page(), Some(page));
        assert_eq!(pool.page_count(), 1);
    }

    #[test]
    fn test_zeroed_page() {
        let page = zeroed_page();
        assert!(page.iter().all(|&w| w == 0));
    }
}
