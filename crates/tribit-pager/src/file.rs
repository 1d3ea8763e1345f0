//! Page file: page-granular I/O against the backing file.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tribit_common::page::{page_from_bytes, page_to_bytes, Page, PageHandle, PAGE_SIZE};
use tribit_common::{PagerConfig, Result, TribitError};

/// Reads and writes whole pages of a single backing file.
///
/// Page `n` lives at byte offset `n * PAGE_SIZE`. Pages beyond the end of
/// the file read as zeros.
pub struct PageFile {
    /// Path to the file.
    path: PathBuf,
    /// Enable fsync after writes.
    fsync_enabled: bool,
    inner: Mutex<FileInner>,
}

struct FileInner {
    file: File,
    /// Number of pages in the file.
    num_pages: u32,
}

impl PageFile {
    /// Opens or creates the page file named by the configuration.
    pub fn open(config: &PagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let path = config.file_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            path,
            fsync_enabled: config.fsync_enabled,
            inner: Mutex::new(FileInner { file, num_pages }),
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads a page into `page`. Pages past the end of the file read as zeros.
    pub fn read_page(&self, handle: PageHandle, page: &mut Page) -> Result<()> {
        if handle.is_null() {
            return Err(TribitError::InvalidHandle(handle.as_u32()));
        }

        let mut inner = self.inner.lock();
        if handle.as_u32() >= inner.num_pages {
            page.fill(0);
            return Ok(());
        }

        let offset = (handle.as_u32() as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        inner
            .file
            .read_exact(&mut buffer)
            .map_err(|e| TribitError::PageCorrupted {
                page: handle.as_u32(),
                reason: e.to_string(),
            })?;

        page_from_bytes(&buffer, page);
        Ok(())
    }

    /// Writes a page to the file, extending it if needed.
    pub fn write_page(&self, handle: PageHandle, page: &Page) -> Result<()> {
        if handle.is_null() {
            return Err(TribitError::InvalidHandle(handle.as_u32()));
        }

        let mut buffer = [0u8; PAGE_SIZE];
        page_to_bytes(page, &mut buffer);

        let mut inner = self.inner.lock();
        let offset = (handle.as_u32() as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&buffer)?;

        if self.fsync_enabled {
            inner.file.sync_data()?;
        }

        if handle.as_u32() >= inner.num_pages {
            inner.num_pages = handle.as_u32() + 1;
        }

        Ok(())
    }

    /// Returns the number of pages in the file.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Discards every page in the file.
    pub fn truncate(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.set_len(0)?;
        inner.num_pages = 0;
        Ok(())
    }

    /// Flushes all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for PageFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFile")
            .field("path", &self.path)
            .field("num_pages", &self.num_pages())
            .finish()
    }
}
