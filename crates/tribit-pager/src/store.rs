//! The page store: allocation, mapping and residency of fixed-size page runs.

use crate::file::PageFile;
use crate::frame::BufferFrame;
use crate::pool::{zeroed_page, EvictedPage, FramePool, FramePoolStats};
use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use tribit_common::page::{Page, PageHandle, PAGE_SIZE};
use tribit_common::{PagerConfig, Result, TribitError};

/// Persisted handle of a root record.
///
/// Obtained from [`PageStore::root_alloc`] and dereferenced through
/// [`PageStore::root_deref_read`] / [`PageStore::root_deref_write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootRef {
    handle: PageHandle,
}

impl RootRef {
    /// Rebuilds a root reference from a persisted handle.
    pub const fn from_handle(handle: PageHandle) -> Self {
        Self { handle }
    }

    /// Returns the page handle backing the root record.
    pub const fn handle(&self) -> PageHandle {
        self.handle
    }
}

impl std::fmt::Display for RootRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "root@{}", self.handle)
    }
}

/// Allocator and mapper of fixed-size pages.
///
/// A run of `count` pages occupies consecutive page numbers, so page `i` of a
/// run starting at `h` is `h.page(i)`. Every method takes `&self`; one store
/// can back many bitmaps.
pub trait PageStore: Send + Sync {
    /// Read-only view of a page. Keeps the page resident while alive.
    type ReadGuard<'a>: Deref<Target = Page>
    where
        Self: 'a;

    /// Write-intent view of a page. The page is marked dirty on creation.
    type WriteGuard<'a>: DerefMut<Target = Page>
    where
        Self: 'a;

    /// Reserves a run of `count` consecutive pages. Contents are unspecified
    /// until [`zero`](Self::zero) is called.
    fn alloc_pages(&self, count: u32) -> Result<PageHandle>;

    /// Zero-fills `count` pages starting at `handle`.
    fn zero(&self, handle: PageHandle, count: u32) -> Result<()>;

    /// Frees the whole run starting at `handle`.
    fn unmap(&self, handle: PageHandle) -> Result<()>;

    /// Drops the run starting at `handle` from memory, writing dirty pages
    /// back. The handle stays valid; the next dereference reloads it.
    fn unload(&self, handle: PageHandle) -> Result<()>;

    /// Dereferences a page read-only.
    fn deref_read(&self, handle: PageHandle) -> Result<Self::ReadGuard<'_>>;

    /// Dereferences a page with write intent.
    fn deref_write(&self, handle: PageHandle) -> Result<Self::WriteGuard<'_>>;

    /// Returns the length of the run starting at `handle`, if allocated.
    fn run_len(&self, handle: PageHandle) -> Option<u32>;

    /// Returns the number of pages currently held in memory.
    fn resident_pages(&self) -> usize;

    /// Returns the number of allocated pages.
    fn allocated_pages(&self) -> usize;

    /// Writes every dirty page back.
    fn flush(&self) -> Result<()>;

    /// Allocates a zeroed root record of `size` bytes.
    fn root_alloc(&self, size: usize) -> Result<RootRef> {
        if size == 0 || size > PAGE_SIZE {
            return Err(TribitError::InvalidParameter {
                name: "root_size".to_string(),
                value: size.to_string(),
            });
        }
        let handle = self.alloc_pages(1)?;
        self.zero(handle, 1)?;
        Ok(RootRef::from_handle(handle))
    }

    /// Dereferences a root record read-only.
    fn root_deref_read(&self, root: RootRef) -> Result<Self::ReadGuard<'_>> {
        self.deref_read(root.handle())
    }

    /// Dereferences a root record with write intent.
    fn root_deref_write(&self, root: RootRef) -> Result<Self::WriteGuard<'_>> {
        self.deref_write(root.handle())
    }

    /// Frees a root record.
    fn root_free(&self, root: RootRef) -> Result<()> {
        self.unmap(root.handle())
    }
}

/// Tracks which page numbers are handed out.
///
/// Freed runs are kept in a start-ordered map and coalesced with their
/// neighbours; allocation is first fit, then bump.
#[derive(Debug)]
struct RunAllocator {
    /// Next never-used page number. Page 0 is reserved as null.
    next_page: u32,
    /// Allocated runs, start to length.
    runs: BTreeMap<u32, u32>,
    /// Free runs below `next_page`, start to length.
    free: BTreeMap<u32, u32>,
    /// Total pages in `runs`.
    allocated: usize,
}

impl RunAllocator {
    fn new() -> Self {
        Self {
            next_page: 1,
            runs: BTreeMap::new(),
            free: BTreeMap::new(),
            allocated: 0,
        }
    }

    fn alloc(&mut self, count: u32) -> Result<u32> {
        let fit = self
            .free
            .iter()
            .find(|(_, &len)| len >= count)
            .map(|(&start, &len)| (start, len));

        let start = match fit {
            Some((start, len)) => {
                self.free.remove(&start);
                if len > count {
                    self.free.insert(start + count, len - count);
                }
                start
            }
            None => {
                let start = self.next_page;
                self.next_page = start
                    .checked_add(count)
                    .filter(|&end| end < u32::MAX - 1)
                    .ok_or_else(|| TribitError::Internal("page space exhausted".to_string()))?;
                start
            }
        };

        self.runs.insert(start, count);
        self.allocated += count as usize;
        Ok(start)
    }

    fn free(&mut self, start: u32) -> Option<u32> {
        let count = self.runs.remove(&start)?;
        self.allocated -= count as usize;

        let mut run_start = start;
        let mut run_len = count;

        if let Some((&prev_start, &prev_len)) = self.free.range(..start).next_back() {
            if prev_start + prev_len == start {
                self.free.remove(&prev_start);
                run_start = prev_start;
                run_len += prev_len;
            }
        }
        if let Some(next_len) = self.free.remove(&(start + count)) {
            run_len += next_len;
        }

        if run_start + run_len == self.next_page {
            self.next_page = run_start;
        } else {
            self.free.insert(run_start, run_len);
        }
        Some(count)
    }

    fn run_len(&self, start: u32) -> Option<u32> {
        self.runs.get(&start).copied()
    }

    fn contains(&self, page: u32) -> bool {
        self.runs
            .range(..=page)
            .next_back()
            .is_some_and(|(&start, &len)| page < start + len)
    }
}

/// Buffered, file-backed page store.
///
/// Resident pages live in a fixed pool of frames. When the pool is full an
/// unpinned frame is evicted by the clock policy; dirty victims are written
/// to the page file and reloaded from it on the next dereference.
///
/// The allocation map is held in memory only, so the page file is scratch
/// space for evicted pages and is truncated on open.
pub struct BufferedPageStore {
    config: PagerConfig,
    pool: FramePool,
    file: PageFile,
    allocator: Mutex<RunAllocator>,
    /// Serializes misses, zero-fills and unloads so a page is never loaded twice.
    load_lock: Mutex<()>,
}

impl BufferedPageStore {
    /// Opens a page store with the given configuration.
    pub fn open(config: PagerConfig) -> Result<Self> {
        config.validate()?;
        let file = PageFile::open(&config)?;
        file.truncate()?;

        tracing::debug!(
            path = %file.path().display(),
            num_frames = config.num_frames,
            "opened page store"
        );

        Ok(Self {
            pool: FramePool::new(config.num_frames),
            file,
            allocator: Mutex::new(RunAllocator::new()),
            load_lock: Mutex::new(()),
            config,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PagerConfig {
        &self.config
    }

    /// Returns frame pool statistics.
    pub fn pool_stats(&self) -> FramePoolStats {
        self.pool.stats()
    }

    fn write_back(&self, evicted: Option<EvictedPage>) -> Result<()> {
        if let Some(evicted) = evicted {
            tracing::trace!(page = %evicted.page, "wrote back evicted page");
            self.file.write_page(evicted.page, &evicted.data)?;
        }
        Ok(())
    }

    /// Returns the pinned frame of `handle`, loading it from the file on a miss.
    fn pin(&self, handle: PageHandle) -> Result<&BufferFrame> {
        if let Some(frame) = self.pool.fetch_page(handle) {
            return Ok(frame);
        }

        let _load = self.load_lock.lock();
        if let Some(frame) = self.pool.fetch_page(handle) {
            return Ok(frame);
        }
        if !self.allocator.lock().contains(handle.as_u32()) {
            return Err(TribitError::PageNotFound {
                page: handle.as_u32(),
            });
        }

        let mut data = zeroed_page();
        self.file.read_page(handle, &mut data)?;
        let (frame, evicted) = self.pool.load_page(handle, &data)?;
        if let Err(e) = self.write_back(evicted) {
            frame.unpin();
            return Err(e);
        }

        tracing::trace!(page = %handle, "reloaded page");
        Ok(frame)
    }
}

impl PageStore for BufferedPageStore {
    type ReadGuard<'a> = PageReadGuard<'a>;
    type WriteGuard<'a> = PageWriteGuard<'a>;

    fn alloc_pages(&self, count: u32) -> Result<PageHandle> {
        if count == 0 {
            return Err(TribitError::InvalidParameter {
                name: "count".to_string(),
                value: count.to_string(),
            });
        }
        let start = self.allocator.lock().alloc(count)?;
        Ok(PageHandle(start))
    }

    fn zero(&self, handle: PageHandle, count: u32) -> Result<()> {
        let _load = self.load_lock.lock();
        for i in 0..count {
            let page = handle.page(i);
            if !self.allocator.lock().contains(page.as_u32()) {
                return Err(TribitError::PageNotFound {
                    page: page.as_u32(),
                });
            }

            let (frame, evicted) = self.pool.new_page(page)?;
            frame.write_data().fill(0);
            frame.set_dirty(true);
            frame.unpin();
            self.write_back(evicted)?;
        }
        Ok(())
    }

    fn unmap(&self, handle: PageHandle) -> Result<()> {
        let count = self
            .run_len(handle)
            .ok_or(TribitError::InvalidHandle(handle.as_u32()))?;

        let _load = self.load_lock.lock();
        for i in 0..count {
            let page = handle.page(i);
            if self.pool.contains(page) && !self.pool.delete_page(page) {
                return Err(TribitError::Internal(format!("unmap of pinned page {}", page)));
            }
        }
        self.allocator.lock().free(handle.as_u32());
        Ok(())
    }

    fn unload(&self, handle: PageHandle) -> Result<()> {
        let count = self
            .run_len(handle)
            .ok_or(TribitError::InvalidHandle(handle.as_u32()))?;

        let _load = self.load_lock.lock();
        for i in 0..count {
            let page = handle.page(i);
            self.pool
                .flush_page(page, |pg, data| self.file.write_page(pg, data))?;
            // A pinned page stays resident; its data is already safe on disk.
            self.pool.delete_page(page);
        }
        Ok(())
    }

    fn deref_read(&self, handle: PageHandle) -> Result<PageReadGuard<'_>> {
        loop {
            let frame = self.pin(handle)?;
            let data = frame.read_data();
            if frame.page() == Some(handle) {
                return Ok(PageReadGuard {
                    data: ManuallyDrop::new(data),
                    frame,
                });
            }
            // Recycled between pin and lock
            drop(data);
            frame.unpin();
        }
    }

    fn deref_write(&self, handle: PageHandle) -> Result<PageWriteGuard<'_>> {
        loop {
            let frame = self.pin(handle)?;
            let data = frame.write_data();
            if frame.page() == Some(handle) {
                frame.set_dirty(true);
                return Ok(PageWriteGuard {
                    data: ManuallyDrop::new(data),
                    frame,
                });
            }
            drop(data);
            frame.unpin();
        }
    }

    fn run_len(&self, handle: PageHandle) -> Option<u32> {
        self.allocator.lock().run_len(handle.as_u32())
    }

    fn resident_pages(&self) -> usize {
        self.pool.page_count()
    }

    fn allocated_pages(&self) -> usize {
        self.allocator.lock().allocated
    }

    fn flush(&self) -> Result<()> {
        let flushed = self
            .pool
            .flush_all(|page, data| self.file.write_page(page, data))?;
        self.file.sync()?;
        tracing::trace!(flushed, "flushed page store");
        Ok(())
    }
}

impl std::fmt::Debug for BufferedPageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedPageStore")
            .field("pool", &self.pool)
            .field("file", &self.file)
            .field("allocated_pages", &self.allocated_pages())
            .finish()
    }
}

/// RAII guard for reading a page. Releases the data lock, then unpins.
pub struct PageReadGuard<'a> {
    data: ManuallyDrop<RwLockReadGuard<'a, Box<Page>>>,
    frame: &'a BufferFrame,
}

impl Deref for PageReadGuard<'_> {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.data
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: `data` is dropped exactly once, here, and never touched after.
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.frame.unpin();
    }
}

/// RAII guard for writing a page. Releases the data lock, then unpins.
pub struct PageWriteGuard<'a> {
    data: ManuallyDrop<RwLockWriteGuard<'a, Box<Page>>>,
    frame: &'a BufferFrame,
}

impl Deref for PageWriteGuard<'_> {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.data
    }
}

impl DerefMut for PageWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Page {
        &mut self.data
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: `data` is dropped exactly once, here, and never touched after.
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.frame.unpin();
    }
}
