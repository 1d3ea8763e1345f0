//! Lock-free page table mapping page handles to frames.

use crate::frame::FrameId;
use std::sync::atomic::{AtomicU32, Ordering};
use tribit_common::page::PageHandle;

/// Direct array size. Covers the first 16384 pages (64 MB at 4 KB pages).
const DIRECT_PATH_SIZE: usize = 16384;

/// Sentinel value for empty slots in direct path and hash values.
const EMPTY_FRAME: u32 = u32::MAX;

/// Sentinel value for empty key slots in hash table.
const EMPTY_KEY: u32 = u32::MAX;

/// Sentinel value for deleted key slots (tombstone).
const TOMBSTONE_KEY: u32 = u32::MAX - 1;

/// Lock-free page table mapping PageHandle to FrameId.
///
/// Uses two-tier lookup:
/// - Direct array for page numbers below 16384
/// - Open-addressing hash table with linear probing above that
pub struct PageTable {
    /// Direct array indexed by page number. Stores frame_id directly.
    direct_path: Box<[AtomicU32]>,
    /// Hash table keys (page numbers).
    hash_keys: Box<[AtomicU32]>,
    /// Hash table values (frame_id).
    hash_values: Box<[AtomicU32]>,
    /// Bitmask for hash table indexing (hash_size - 1).
    hash_mask: usize,
}

impl PageTable {
    /// Creates a new page table with capacity for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        // 2x capacity for ~50% load factor
        let hash_size = (capacity * 2).next_power_of_two().max(1024);

        let direct_path: Box<[AtomicU32]> = (0..DIRECT_PATH_SIZE)
            .map(|_| AtomicU32::new(EMPTY_FRAME))
            .collect();

        let hash_keys: Box<[AtomicU32]> = (0..hash_size)
            .map(|_| AtomicU32::new(EMPTY_KEY))
            .collect();

        let hash_values: Box<[AtomicU32]> = (0..hash_size)
            .map(|_| AtomicU32::new(EMPTY_FRAME))
            .collect();

        Self {
            direct_path,
            hash_keys,
            hash_values,
            hash_mask: hash_size - 1,
        }
    }

    /// Looks up a page and returns its frame ID if resident.
    #[inline(always)]
    pub fn get(&self, page: PageHandle) -> Option<FrameId> {
        if (page.0 as usize) < DIRECT_PATH_SIZE {
            let val = self.direct_path[page.0 as usize].load(Ordering::Acquire);
            if val != EMPTY_FRAME {
                return Some(FrameId(val));
            }
            return None;
        }
        self.get_from_hash(page.0)
    }

    #[inline]
    fn get_from_hash(&self, key: u32) -> Option<FrameId> {
        let mut idx = self.hash_index(key);

        for _ in 0..self.hash_keys.len() {
            let stored_key = self.hash_keys[idx].load(Ordering::Acquire);
            if stored_key == EMPTY_KEY {
                return None;
            }
            if stored_key == key {
                let frame_id = self.hash_values[idx].load(Ordering::Acquire);
                return Some(FrameId(frame_id));
            }
            // Skip tombstones and continue probing
            idx = (idx + 1) & self.hash_mask;
        }
        None
    }

    /// Inserts a page to frame mapping. Returns true on success.
    pub fn insert(&self, page: PageHandle, frame_id: FrameId) -> bool {
        if (page.0 as usize) < DIRECT_PATH_SIZE {
            self.direct_path[page.0 as usize].store(frame_id.0, Ordering::Release);
            return true;
        }
        self.insert_to_hash(page.0, frame_id)
    }

    fn insert_to_hash(&self, key: u32, frame_id: FrameId) -> bool {
        let mut idx = self.hash_index(key);

        for _ in 0..self.hash_keys.len() {
            let stored_key = self.hash_keys[idx].load(Ordering::Acquire);
            if stored_key == EMPTY_KEY || stored_key == TOMBSTONE_KEY {
                self.hash_values[idx].store(frame_id.0, Ordering::Release);
                self.hash_keys[idx].store(key, Ordering::Release);
                return true;
            }
            if stored_key == key {
                self.hash_values[idx].store(frame_id.0, Ordering::Release);
                return true;
            }
            idx = (idx + 1) & self.hash_mask;
        }
        false // Table full
    }

    /// Removes a page mapping. Returns the frame ID if it was present.
    pub fn remove(&self, page: PageHandle) -> Option<FrameId> {
        if (page.0 as usize) < DIRECT_PATH_SIZE {
            let old = self.direct_path[page.0 as usize].swap(EMPTY_FRAME, Ordering::AcqRel);
            if old != EMPTY_FRAME {
                return Some(FrameId(old));
            }
            return None;
        }
        self.remove_from_hash(page.0)
    }

    fn remove_from_hash(&self, key: u32) -> Option<FrameId> {
        let mut idx = self.hash_index(key);

        for _ in 0..self.hash_keys.len() {
            let stored_key = self.hash_keys[idx].load(Ordering::Acquire);
            if stored_key == EMPTY_KEY {
                return None;
            }
            if stored_key == key {
                let frame_id = self.hash_values[idx].load(Ordering::Acquire);
                self.hash_keys[idx].store(TOMBSTONE_KEY, Ordering::Release);
                return Some(FrameId(frame_id));
            }
            idx = (idx + 1) & self.hash_mask;
        }
        None
    }

    /// Computes hash table index for a key.
    #[inline(always)]
    fn hash_index(&self, key: u32) -> usize {
        // FxHash-style multiply for distribution
        let hash = (key as u64).wrapping_mul(0x517cc1b727220a95);
        ((hash >> 32) as usize) & self.hash_mask
    }

    /// Returns true if the page is in the table.
    pub fn contains(&self, page: PageHandle) -> bool {
        self.get(page).is_some()
    }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize {
        let direct = self
            .direct_path
            .iter()
            .filter(|slot| slot.load(Ordering::Relaxed) != EMPTY_FRAME)
            .count();
        let hashed = self
            .hash_keys
            .iter()
            .filter(|slot| {
                let val = slot.load(Ordering::Relaxed);
                val != EMPTY_KEY && val != TOMBSTONE_KEY
            })
            .count();
        direct + hashed
    }

    /// Iterates over all entries, calling the provided function for each.
    /// Returns early if the function returns false.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(PageHandle, FrameId) -> bool,
    {
        for (page_num, slot) in self.direct_path.iter().enumerate() {
            let val = slot.load(Ordering::Relaxed);
            if val != EMPTY_FRAME && !f(PageHandle(page_num as u32), FrameId(val)) {
                return;
            }
        }

        for (idx, key_slot) in self.hash_keys.iter().enumerate() {
            let key = key_slot.load(Ordering::Relaxed);
            if key != EMPTY_KEY && key != TOMBSTONE_KEY {
                let frame_id = self.hash_values[idx].load(Ordering::Relaxed);
                if !f(PageHandle(key), FrameId(frame_id)) {
                    return;
                }
            }
        }
    }
}
