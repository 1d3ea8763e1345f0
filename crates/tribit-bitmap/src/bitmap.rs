//! The tri-state bitmap index.
//!
//! A bitmap is a three-level radix tree over the 32-bit key space:
//! ```text
//! Root Table --roots[root]--> Dispatch Page --entries[dispatch]--> Leaf run
//! ```
//! Dispatch pages and leaves are allocated on first write beneath them and
//! released as soon as their last non-default key goes away. Handles are the
//! only thing kept between calls; every access dereferences through the page
//! store, so pages may be evicted or unloaded at any time between operations.

use crate::constants::{DISPATCH_COUNT, LEAF_KEYS, ROOT_TABLE_SIZE};
use crate::encoding::{Dynamic, Encoding};
use crate::enumerator::{Cursor, Enumerator};
use crate::key::BitmapKey;
use crate::layout::{DispatchEntry, RootTable};
use crate::state::BitState;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tribit_common::page::{PageHandle, PAGE_SIZE, PAGE_WORDS};
use tribit_common::{Result, TribitError};
use tribit_pager::{PageStore, RootRef};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Resolved path to the leaf holding a key.
#[derive(Debug, Clone, Copy)]
struct LeafView {
    dispatch: PageHandle,
    leaf: PageHandle,
}

/// Space accounting of a bitmap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitmapStats {
    /// Bytes of dispatch and leaf pages mapped.
    pub memory_bytes: usize,
    /// Number of non-default keys.
    pub entries: u64,
    /// Key capacity of the mapped leaves.
    pub slots: u64,
}

/// Every page owned by a bitmap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitmapPages {
    /// Root table page.
    pub root: PageHandle,
    /// Dispatch pages, in key order.
    pub dispatch: Vec<PageHandle>,
    /// First pages of the leaf runs, in key order.
    pub leaves: Vec<PageHandle>,
}

impl BitmapPages {
    /// Iterates over all handles, root first.
    pub fn iter(&self) -> impl Iterator<Item = PageHandle> + '_ {
        std::iter::once(self.root)
            .chain(self.dispatch.iter().copied())
            .chain(self.leaves.iter().copied())
    }
}

/// Hierarchical, page-backed, tri-state bitmap.
///
/// Reads take `&self`, mutations take `&mut self`: one writer at a time, as
/// the borrow checker enforces. Several bitmaps may share one store.
pub struct Bitmap<S: PageStore> {
    store: Arc<S>,
    root: RootRef,
    nullable: bool,
    generation: u64,
    instance: u64,
}

impl<S: PageStore> Bitmap<S> {
    /// Allocates and initializes a new root table.
    ///
    /// Returns the persisted root handle; use [`Bitmap::open`] to work with it.
    pub fn create(store: &S, nullable: bool) -> Result<RootRef> {
        let root = store.root_alloc(ROOT_TABLE_SIZE)?;
        {
            let mut page = store.root_deref_write(root)?;
            RootTable::init(&mut page, nullable);
        }
        tracing::debug!(%root, nullable, "created bitmap");
        Ok(root)
    }

    /// Opens an existing bitmap, checking its signature.
    pub fn open(store: Arc<S>, root: RootRef) -> Result<Self> {
        let nullable = {
            let page = store.root_deref_read(root)?;
            if !RootTable::has_signature(&page) {
                return Err(TribitError::BadSignature {
                    page: root.handle().as_u32(),
                });
            }
            RootTable::is_nullable(&page)
        };

        Ok(Self {
            store,
            root,
            nullable,
            generation: 1,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Creates and opens a new bitmap.
    pub fn new(store: Arc<S>, nullable: bool) -> Result<Self> {
        let root = Self::create(&store, nullable)?;
        Self::open(store, root)
    }

    /// Returns the root handle.
    pub fn root(&self) -> RootRef {
        self.root
    }

    /// Returns the page store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns true if absent keys read as `Null` rather than `False`.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Returns the mutation counter. It increases on every mutating call.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Process-unique id of this open instance.
    pub(crate) fn instance(&self) -> u64 {
        self.instance
    }

    #[inline]
    fn encoding(&self) -> Dynamic {
        Dynamic(self.nullable)
    }

    #[inline]
    fn bump(&mut self) {
        self.generation += 1;
    }

    /// Walks the tree without allocating. None means the key is in an
    /// unmapped subtree.
    fn resolve_for_read(&self, key: BitmapKey) -> Result<Option<LeafView>> {
        let dispatch = RootTable::slot(&*self.store.root_deref_read(self.root)?, key.root());
        if dispatch.is_null() {
            return Ok(None);
        }

        let entry = DispatchEntry::read(&*self.store.deref_read(dispatch)?, key.dispatch());
        if entry.leaf.is_null() {
            return Ok(None);
        }

        Ok(Some(LeafView {
            dispatch,
            leaf: entry.leaf,
        }))
    }

    /// Walks the tree, allocating zeroed pages at every missing link.
    ///
    /// A new child is zeroed before its handle is installed in the parent.
    fn resolve_for_write(&mut self, key: BitmapKey) -> Result<LeafView> {
        let mut dispatch = RootTable::slot(&*self.store.root_deref_read(self.root)?, key.root());
        if dispatch.is_null() {
            dispatch = self.store.alloc_pages(1)?;
            self.store.zero(dispatch, 1)?;
            let mut root = self.store.root_deref_write(self.root)?;
            RootTable::set_slot(&mut root, key.root(), dispatch);
            tracing::debug!(root = key.root(), page = %dispatch, "allocated dispatch page");
        }

        let entry = DispatchEntry::read(&*self.store.deref_read(dispatch)?, key.dispatch());
        if !entry.leaf.is_null() {
            return Ok(LeafView {
                dispatch,
                leaf: entry.leaf,
            });
        }

        let pages = self.encoding().leaf_pages();
        let leaf = self.store.alloc_pages(pages)?;
        self.store.zero(leaf, pages)?;
        {
            let mut page = self.store.deref_write(dispatch)?;
            DispatchEntry::new(leaf, 0).write(&mut page, key.dispatch());
        }
        tracing::debug!(
            root = key.root(),
            dispatch = key.dispatch(),
            page = %leaf,
            pages,
            "allocated leaf"
        );

        Ok(LeafView { dispatch, leaf })
    }

    /// Returns the state of a key.
    pub fn get(&self, key: u32) -> Result<BitState> {
        let key = BitmapKey(key);
        let enc = self.encoding();

        let Some(view) = self.resolve_for_read(key)? else {
            return Ok(enc.default_state());
        };

        let (word, slot) = enc.locate(key);
        let page = self.store.deref_read(view.leaf.page((word / PAGE_WORDS) as u32))?;
        Ok(enc.decode(page[word % PAGE_WORDS], slot))
    }

    /// Sets a key to `True`. Returns the previous state.
    pub fn set(&mut self, key: u32) -> Result<BitState> {
        self.transition(BitmapKey(key), BitState::True, true)
    }

    /// Sets a key to `False`. Returns the previous state.
    ///
    /// On a nullable bitmap this records an explicit `False`, allocating if
    /// needed, and never releases pages. On a plain bitmap it is the same as
    /// [`remove`](Self::remove).
    pub fn reset(&mut self, key: u32) -> Result<BitState> {
        let nullable = self.nullable;
        self.transition(BitmapKey(key), BitState::False, nullable)
    }

    /// Returns a key to its default state (`Null` or `False`). Returns the
    /// previous state.
    pub fn remove(&mut self, key: u32) -> Result<BitState> {
        let target = self.encoding().default_state();
        self.transition(BitmapKey(key), target, false)
    }

    /// Moves a key to `target`, keeping `active_bits` in step and releasing
    /// the leaf when its count drops to zero.
    fn transition(&mut self, key: BitmapKey, target: BitState, allocate: bool) -> Result<BitState> {
        self.bump();
        let enc = self.encoding();

        let view = if allocate {
            self.resolve_for_write(key)?
        } else {
            match self.resolve_for_read(key)? {
                Some(view) => view,
                None => return Ok(enc.default_state()),
            }
        };

        let (word, slot) = enc.locate(key);
        let page = view.leaf.page((word / PAGE_WORDS) as u32);
        let index = word % PAGE_WORDS;

        let previous = enc.decode(self.store.deref_read(page)?[index], slot);
        if previous == target {
            return Ok(previous);
        }
        {
            let mut leaf = self.store.deref_write(page)?;
            leaf[index] = enc.encode(leaf[index], slot, target);
        }

        match (enc.counts(previous), enc.counts(target)) {
            (false, true) => {
                self.adjust_active(view, key, 1)?;
            }
            (true, false) => {
                if self.adjust_active(view, key, -1)? == 0 {
                    self.release_leaf(view, key)?;
                }
            }
            _ => {}
        }

        Ok(previous)
    }

    /// Adds `delta` to the dispatch entry of `key`. Returns the new count.
    fn adjust_active(&mut self, view: LeafView, key: BitmapKey, delta: i16) -> Result<u16> {
        let mut page = self.store.deref_write(view.dispatch)?;
        let entry = DispatchEntry::read(&page, key.dispatch());

        let active_bits = entry.active_bits.checked_add_signed(delta).ok_or_else(|| {
            TribitError::PageCorrupted {
                page: view.dispatch.as_u32(),
                reason: format!(
                    "active_bits {} of entry {} out of range",
                    entry.active_bits,
                    key.dispatch()
                ),
            }
        })?;

        DispatchEntry::new(entry.leaf, active_bits).write(&mut page, key.dispatch());
        Ok(active_bits)
    }

    /// Frees an empty leaf. If that empties its dispatch page, frees the
    /// dispatch page too and clears the root slot.
    fn release_leaf(&mut self, view: LeafView, key: BitmapKey) -> Result<()> {
        let dispatch_empty = {
            let mut page = self.store.deref_write(view.dispatch)?;
            DispatchEntry::EMPTY.write(&mut page, key.dispatch());
            DispatchEntry::page_is_empty(&page)
        };
        self.store.unmap(view.leaf)?;
        tracing::debug!(
            root = key.root(),
            dispatch = key.dispatch(),
            page = %view.leaf,
            "released leaf"
        );

        if dispatch_empty {
            {
                let mut root = self.store.root_deref_write(self.root)?;
                RootTable::set_slot(&mut root, key.root(), PageHandle::NULL);
            }
            self.store.unmap(view.dispatch)?;
            tracing::debug!(root = key.root(), page = %view.dispatch, "released dispatch page");
        }
        Ok(())
    }

    /// Frees every dispatch page and leaf, emptying each root slot as soon as
    /// its subtree is gone. Corrupted entries and unreadable dispatch pages
    /// are logged and skipped.
    fn delete_nodes(&self) -> Result<()> {
        let slots = RootTable::slots(&*self.store.root_deref_read(self.root)?);

        for (root, &dispatch) in slots.iter().enumerate() {
            if dispatch.is_null() {
                continue;
            }
            match self.store.deref_read(dispatch) {
                Ok(page) => {
                    let entries = DispatchEntry::read_all(&*page);
                    drop(page);
                    self.delete_leaves(root, &entries);
                    if let Err(e) = self.store.unmap(dispatch) {
                        tracing::warn!(root, page = %dispatch, error = %e, "skipping unreleasable dispatch page");
                    }
                }
                Err(e) => {
                    tracing::warn!(root, page = %dispatch, error = %e, "skipping unreadable dispatch page");
                }
            }

            let mut page = self.store.root_deref_write(self.root)?;
            RootTable::set_slot(&mut *page, root, PageHandle::NULL);
        }
        Ok(())
    }

    fn delete_leaves(&self, root: usize, entries: &[DispatchEntry]) {
        for (index, entry) in entries.iter().enumerate() {
            if entry.is_corrupted() {
                tracing::warn!(
                    root,
                    dispatch = index,
                    active_bits = entry.active_bits,
                    "skipping dispatch entry with null leaf"
                );
                continue;
            }
            if entry.leaf.is_null() {
                continue;
            }
            if let Err(e) = self.store.unmap(entry.leaf) {
                tracing::warn!(
                    root,
                    dispatch = index,
                    page = %entry.leaf,
                    error = %e,
                    "skipping unreleasable leaf"
                );
            }
        }
    }

    /// Frees every page of the bitmap, root table included.
    pub fn destroy(mut self) -> Result<()> {
        self.bump();
        self.delete_nodes()?;
        self.store.root_free(self.root)?;
        tracing::debug!(root = %self.root, "destroyed bitmap");
        Ok(())
    }

    /// Removes every key, keeping the bitmap usable.
    pub fn clear(&mut self) -> Result<()> {
        self.bump();
        self.delete_nodes()?;
        tracing::debug!(root = %self.root, "cleared bitmap");
        Ok(())
    }

    /// Drops every page of the bitmap from memory. Data is kept and the
    /// pages are reloaded on next access.
    pub fn unload(&mut self) -> Result<()> {
        self.bump();
        let slots = RootTable::slots(&*self.store.root_deref_read(self.root)?);

        let mut unloaded = 0usize;
        for &dispatch in slots.iter().filter(|h| !h.is_null()) {
            let entries = DispatchEntry::read_all(&*self.store.deref_read(dispatch)?);
            for entry in entries.iter().filter(|e| !e.leaf.is_null()) {
                self.store.unload(entry.leaf)?;
                unloaded += 1;
            }
            self.store.unload(dispatch)?;
            unloaded += 1;
        }
        self.store.unload(self.root.handle())?;

        tracing::debug!(root = %self.root, runs = unloaded + 1, "unloaded bitmap");
        Ok(())
    }

    /// Computes memory use, entry count and slot capacity.
    pub fn compute_stats(&self) -> Result<BitmapStats> {
        let enc = self.encoding();
        let leaf_bytes = enc.leaf_pages() as usize * PAGE_SIZE;
        let slots = RootTable::slots(&*self.store.root_deref_read(self.root)?);

        let mut stats = BitmapStats::default();
        for &dispatch in slots.iter().filter(|h| !h.is_null()) {
            stats.memory_bytes += PAGE_SIZE;
            let page = self.store.deref_read(dispatch)?;
            for index in 0..DISPATCH_COUNT {
                let entry = DispatchEntry::read(&page, index);
                if entry.leaf.is_null() {
                    continue;
                }
                stats.memory_bytes += leaf_bytes;
                stats.entries += entry.active_bits as u64;
                stats.slots += LEAF_KEYS as u64;
            }
        }
        Ok(stats)
    }

    /// Lists every page the bitmap owns.
    pub fn reachable_pages(&self) -> Result<BitmapPages> {
        let slots = RootTable::slots(&*self.store.root_deref_read(self.root)?);

        let mut pages = BitmapPages {
            root: self.root.handle(),
            ..BitmapPages::default()
        };
        for &dispatch in slots.iter().filter(|h| !h.is_null()) {
            pages.dispatch.push(dispatch);
            let entries = DispatchEntry::read_all(&*self.store.deref_read(dispatch)?);
            pages
                .leaves
                .extend(entries.iter().filter(|e| !e.leaf.is_null()).map(|e| e.leaf));
        }
        Ok(pages)
    }

    /// Renders the bitmap as text: header, every key, then the tree with
    /// runs of empty dispatch entries collapsed.
    pub fn debug_dump(&self) -> Result<String> {
        let keys = self.iter().collect::<Result<Vec<_>>>()?;

        let slots = RootTable::slots(&*self.store.root_deref_read(self.root)?);
        let mut tree = Vec::new();
        for (root, &dispatch) in slots.iter().enumerate() {
            if dispatch.is_null() {
                continue;
            }
            let entries = DispatchEntry::read_all(&*self.store.deref_read(dispatch)?);
            tree.push((root, dispatch, entries));
        }

        let mut out = String::new();
        self.render_dump(&mut out, &keys, &tree)
            .map_err(|e| TribitError::Internal(format!("bitmap dump: {}", e)))?;
        Ok(out)
    }

    fn render_dump(
        &self,
        out: &mut String,
        keys: &[(u32, BitState)],
        tree: &[(usize, PageHandle, Vec<DispatchEntry>)],
    ) -> std::fmt::Result {
        writeln!(out, "bitmap {}", self.root)?;
        writeln!(out, " \\generation: {}", self.generation)?;
        writeln!(out, " \\nullable: {}", self.nullable)?;
        writeln!(out, " \\keys:")?;
        for (key, state) in keys {
            writeln!(out, "  \\key: {} = {}", key, state)?;
        }

        for (root, dispatch, entries) in tree {
            writeln!(out, "  root slot {}: {}", root, dispatch)?;

            let mut nil = 0usize;
            for (index, entry) in entries.iter().enumerate() {
                if entry.leaf.is_null() {
                    nil += 1;
                    continue;
                }
                if nil > 0 {
                    writeln!(out, "    {} entries nil", nil)?;
                    nil = 0;
                }
                writeln!(out, "    dispatch entry {}: {}", index, entry.leaf)?;
                writeln!(out, "     \\active_bits: {}", entry.active_bits)?;
            }
            if nil > 0 {
                writeln!(out, "    {} entries nil", nil)?;
            }
        }
        Ok(())
    }

    /// Emits [`debug_dump`](Self::debug_dump) at debug level.
    pub fn log_debug(&self) {
        match self.debug_dump() {
            Ok(dump) => tracing::debug!(root = %self.root, "{}", dump),
            Err(e) => tracing::warn!(root = %self.root, error = %e, "bitmap dump failed"),
        }
    }

    /// Enumerates non-default keys in increasing order, holding page guards
    /// between steps.
    pub fn iter(&self) -> Enumerator<'_, S> {
        self.iter_from(0)
    }

    /// Enumerates non-default keys `>= from` in increasing order.
    pub fn iter_from(&self, from: u32) -> Enumerator<'_, S> {
        Enumerator::with_encoding(self, self.encoding(), from)
    }

    /// Enumerates with an encoding fixed at compile time.
    ///
    /// Fails with `EncodingMismatch` if `E` cannot read this bitmap.
    pub fn enumerator<E: Encoding>(&self, from: u32) -> Result<Enumerator<'_, S, E>> {
        Enumerator::new(self, from)
    }

    /// Returns an owned cursor positioned at `from` that tolerates mutation
    /// of the bitmap between steps.
    pub fn cursor(&self, from: u32) -> Cursor {
        Cursor::with_encoding(self.encoding(), from)
    }
}

impl<S: PageStore> std::fmt::Debug for Bitmap<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("root", &self.root)
            .field("nullable", &self.nullable)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};
    use tribit_common::PagerConfig;
    use tribit_pager::BufferedPageStore;

    fn create_test_store(num_frames: usize) -> (Arc<BufferedPageStore>, TempDir) {
        let dir = tempdir().unwrap();
        let config = PagerConfig {
            data_dir: dir.path().to_path_buf(),
            num_frames,
            fsync_enabled: false,
            ..PagerConfig::default()
        };
        (Arc::new(BufferedPageStore::open(config).unwrap()), dir)
    }

    #[test]
    fn test_bitmap_new_is_empty() {
        let (store, _dir) = create_test_store(64);
        let map = Bitmap::new(store.clone(), false).unwrap();

        assert!(!map.is_nullable());
        assert_eq!(map.generation(), 1);
        assert_eq!(map.get(0).unwrap(), BitState::False);
        assert_eq!(map.get(u32::MAX).unwrap(), BitState::False);
        assert_eq!(map.compute_stats().unwrap(), BitmapStats::default());
        assert_eq!(store.allocated_pages(), 1);
    }

    #[test]
    fn test_bitmap_open_checks_signature() {
        let (store, _dir) = create_test_store(64);

        let root = store.root_alloc(ROOT_TABLE_SIZE).unwrap();
        let err = Bitmap::open(store.clone(), root).unwrap_err();
        assert!(matches!(err, TribitError::BadSignature { page } if page == root.handle().as_u32()));

        let root = Bitmap::create(&*store, true).unwrap();
        let map = Bitmap::open(store, root).unwrap();
        assert!(map.is_nullable());
        assert_eq!(map.root(), root);
    }

    #[test]
    fn test_plain_set_get_reset() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store, false).unwrap();

        assert_eq!(map.set(42).unwrap(), BitState::False);
        assert_eq!(map.set(42).unwrap(), BitState::True);
        assert_eq!(map.get(42).unwrap(), BitState::True);
        assert_eq!(map.get(43).unwrap(), BitState::False);

        assert_eq!(map.reset(42).unwrap(), BitState::True);
        assert_eq!(map.get(42).unwrap(), BitState::False);
        assert_eq!(map.reset(42).unwrap(), BitState::False);
    }

    #[test]
    fn test_plain_reset_unallocated_is_noop() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store.clone(), false).unwrap();

        assert_eq!(map.reset(1_000_000).unwrap(), BitState::False);
        assert_eq!(store.allocated_pages(), 1);
        assert_eq!(map.generation(), 2);
    }

    #[test]
    fn test_nullable_transitions() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store, true).unwrap();

        assert_eq!(map.get(9).unwrap(), BitState::Null);
        assert_eq!(map.reset(9).unwrap(), BitState::Null);
        assert_eq!(map.get(9).unwrap(), BitState::False);
        assert_eq!(map.set(9).unwrap(), BitState::False);
        assert_eq!(map.get(9).unwrap(), BitState::True);
        assert_eq!(map.reset(9).unwrap(), BitState::True);
        assert_eq!(map.reset(9).unwrap(), BitState::False);
        assert_eq!(map.compute_stats().unwrap().entries, 1);

        assert_eq!(map.remove(9).unwrap(), BitState::False);
        assert_eq!(map.get(9).unwrap(), BitState::Null);
        assert_eq!(map.remove(9).unwrap(), BitState::Null);
    }

    #[test]
    fn test_nullable_reset_allocates() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store.clone(), true).unwrap();

        map.reset(5).unwrap();
        let stats = map.compute_stats().unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.memory_bytes, PAGE_SIZE + 2 * PAGE_SIZE);
        // root + dispatch + two-page leaf
        assert_eq!(store.allocated_pages(), 4);
    }

    #[test]
    fn test_remove_releases_leaf_and_dispatch() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store.clone(), false).unwrap();

        map.set(10).unwrap();
        map.set(LEAF_KEYS + 10).unwrap();
        assert_eq!(map.reachable_pages().unwrap().leaves.len(), 2);

        assert_eq!(map.remove(10).unwrap(), BitState::True);
        let pages = map.reachable_pages().unwrap();
        assert_eq!(pages.dispatch.len(), 1);
        assert_eq!(pages.leaves.len(), 1);

        assert_eq!(map.remove(LEAF_KEYS + 10).unwrap(), BitState::True);
        let pages = map.reachable_pages().unwrap();
        assert!(pages.dispatch.is_empty());
        assert!(pages.leaves.is_empty());
        assert_eq!(store.allocated_pages(), 1);
    }

    #[test]
    fn test_remove_absent_key() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store, false).unwrap();

        map.set(100).unwrap();
        let before = map.compute_stats().unwrap();
        let generation = map.generation();

        assert_eq!(map.remove(101).unwrap(), BitState::False);
        assert_eq!(map.remove(u32::MAX).unwrap(), BitState::False);
        assert_eq!(map.compute_stats().unwrap(), before);
        assert_eq!(map.generation(), generation + 2);
    }

    #[test]
    fn test_generation_bumps_on_mutation_only() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store, true).unwrap();

        map.set(1).unwrap();
        map.reset(1).unwrap();
        map.remove(1).unwrap();
        assert_eq!(map.generation(), 4);

        map.get(1).unwrap();
        map.compute_stats().unwrap();
        map.debug_dump().unwrap();
        assert_eq!(map.generation(), 4);

        map.unload().unwrap();
        map.clear().unwrap();
        assert_eq!(map.generation(), 6);
    }

    #[test]
    fn test_compute_stats() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store, false).unwrap();

        for key in [0u32, 1, 2, LEAF_KEYS, 1 << 24] {
            map.set(key).unwrap();
        }

        let stats = map.compute_stats().unwrap();
        // two dispatch pages, three leaves
        assert_eq!(stats.memory_bytes, 5 * PAGE_SIZE);
        assert_eq!(stats.entries, 5);
        assert_eq!(stats.slots, 3 * LEAF_KEYS as u64);
    }

    #[test]
    fn test_clear_keeps_bitmap_usable() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store.clone(), true).unwrap();

        for key in (0..200_000u32).step_by(997) {
            map.set(key).unwrap();
        }
        map.clear().unwrap();

        assert_eq!(store.allocated_pages(), 1);
        assert_eq!(map.compute_stats().unwrap(), BitmapStats::default());
        assert_eq!(map.get(997).unwrap(), BitState::Null);

        assert_eq!(map.set(997).unwrap(), BitState::Null);
        assert_eq!(map.get(997).unwrap(), BitState::True);
    }

    #[test]
    fn test_destroy_frees_everything() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store.clone(), false).unwrap();

        for key in [3u32, 70_000, 4_000_000_000] {
            map.set(key).unwrap();
        }
        map.destroy().unwrap();
        assert_eq!(store.allocated_pages(), 0);
    }

    #[test]
    fn test_destroy_skips_corrupted_entry() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store.clone(), false).unwrap();

        map.set(7).unwrap();
        let dispatch = map.reachable_pages().unwrap().dispatch[0];
        {
            let mut page = store.deref_write(dispatch).unwrap();
            DispatchEntry::new(PageHandle::NULL, 3).write(&mut page, 5);
        }

        map.destroy().unwrap();
        assert_eq!(store.allocated_pages(), 0);
    }

    #[test]
    fn test_clear_skips_unreadable_root_slot() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store.clone(), false).unwrap();

        map.set(7).unwrap();
        map.set(5 << 24).unwrap();
        {
            let mut root = store.root_deref_write(map.root()).unwrap();
            RootTable::set_slot(&mut root, 3, PageHandle(9999));
        }

        map.clear().unwrap();
        assert_eq!(store.allocated_pages(), 1);
        assert!(map.reachable_pages().unwrap().dispatch.is_empty());

        assert_eq!(map.get(7).unwrap(), BitState::False);
        assert_eq!(map.set(7).unwrap(), BitState::False);
        assert_eq!(map.get(7).unwrap(), BitState::True);

        map.destroy().unwrap();
        assert_eq!(store.allocated_pages(), 0);
    }

    #[test]
    fn test_unload_and_reload() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store.clone(), true).unwrap();

        map.set(12).unwrap();
        map.reset(40_000).unwrap();
        map.unload().unwrap();
        assert_eq!(store.resident_pages(), 0);

        assert_eq!(map.get(12).unwrap(), BitState::True);
        assert_eq!(map.get(40_000).unwrap(), BitState::False);
        assert_eq!(map.get(13).unwrap(), BitState::Null);
    }

    #[test]
    fn test_reachable_pages() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store.clone(), true).unwrap();

        map.set(1).unwrap();
        map.set(u32::MAX).unwrap();

        let pages = map.reachable_pages().unwrap();
        assert_eq!(pages.root, map.root().handle());
        assert_eq!(pages.dispatch.len(), 2);
        assert_eq!(pages.leaves.len(), 2);
        assert_eq!(pages.iter().count(), 5);

        let owned: usize = pages.iter().map(|h| store.run_len(h).unwrap() as usize).sum();
        assert_eq!(owned, store.allocated_pages());
    }

    #[test]
    fn test_debug_dump() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store, false).unwrap();

        map.set(3).unwrap();
        map.set(2 * LEAF_KEYS).unwrap();

        let dump = map.debug_dump().unwrap();
        assert!(dump.contains(" \\nullable: false"));
        assert!(dump.contains("  \\key: 3 = True"));
        assert!(dump.contains("  root slot 0: "));
        assert!(dump.contains("    dispatch entry 0: "));
        assert!(dump.contains("    1 entries nil"));
        assert!(dump.contains("    dispatch entry 2: "));
        assert!(dump.contains(&format!("    {} entries nil", DISPATCH_COUNT - 3)));
        assert_eq!(dump.matches("\\active_bits: 1").count(), 2);

        map.log_debug();
    }

    #[test]
    fn test_bitmaps_share_store() {
        let (store, _dir) = create_test_store(64);
        let mut a = Bitmap::new(store.clone(), false).unwrap();
        let mut b = Bitmap::new(store.clone(), true).unwrap();

        a.set(5).unwrap();
        b.reset(5).unwrap();

        assert_eq!(a.get(5).unwrap(), BitState::True);
        assert_eq!(b.get(5).unwrap(), BitState::False);

        a.destroy().unwrap();
        assert_eq!(b.get(5).unwrap(), BitState::False);
        assert_eq!(b.reachable_pages().unwrap().iter().count(), 3);
    }

    #[test]
    fn test_top_of_key_space() {
        let (store, _dir) = create_test_store(64);
        let mut map = Bitmap::new(store, false).unwrap();

        assert_eq!(map.set(u32::MAX).unwrap(), BitState::False);
        assert_eq!(map.get(u32::MAX).unwrap(), BitState::True);
        assert_eq!(map.get(u32::MAX - 1).unwrap(), BitState::False);

        let keys: Vec<_> = map.iter().map(|r| r.unwrap().0).collect();
        assert_eq!(keys, vec![u32::MAX]);
    }
}
