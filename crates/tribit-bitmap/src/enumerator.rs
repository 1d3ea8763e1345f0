//! Ordered enumeration of non-default keys.
//!
//! Both enumerators share one walk: from a lower bound, scan root slots, then
//! dispatch entries, then leaf words, skipping a whole empty slot or entry in
//! one step. Inside a leaf word the next hit is found with `trailing_zeros`.
//!
//! - [`Enumerator`] borrows the bitmap and keeps its page guards between
//!   steps. The borrow rules out mutation while it is alive.
//! - [`Cursor`] owns only its position. Each step re-dereferences the pages,
//!   so the bitmap may be mutated between steps.

use crate::bitmap::Bitmap;
use crate::constants::{DISPATCH_COUNT, ROOT_COUNT};
use crate::encoding::{Dynamic, Encoding};
use crate::key::BitmapKey;
use crate::layout::{DispatchEntry, RootTable};
use crate::state::BitState;
use tribit_common::page::{PageHandle, PAGE_WORDS};
use tribit_common::{Result, TribitError};
use tribit_pager::{PageStore, RootRef};

/// Read guards of the pages last visited, one per level.
///
/// Moving to another page on a level drops the previous guard first, so at
/// most three pages are pinned at a time.
pub(crate) struct PageCache<'a, S: PageStore + 'a> {
    store: &'a S,
    root: Option<(RootRef, S::ReadGuard<'a>)>,
    dispatch: Option<(PageHandle, S::ReadGuard<'a>)>,
    leaf: Option<(PageHandle, S::ReadGuard<'a>)>,
}

impl<'a, S: PageStore + 'a> PageCache<'a, S> {
    pub(crate) fn new(store: &'a S) -> Self {
        Self {
            store,
            root: None,
            dispatch: None,
            leaf: None,
        }
    }

    fn root_slot(&mut self, root: RootRef, index: usize) -> Result<PageHandle> {
        if !matches!(&self.root, Some((cached, _)) if *cached == root) {
            let store = self.store;
            self.root = None;
            self.root = Some((root, store.root_deref_read(root)?));
        }
        match &self.root {
            Some((_, page)) => Ok(RootTable::slot(page, index)),
            None => Err(TribitError::Internal("root guard missing".to_string())),
        }
    }

    fn dispatch_entry(&mut self, handle: PageHandle, index: usize) -> Result<DispatchEntry> {
        if !matches!(&self.dispatch, Some((cached, _)) if *cached == handle) {
            let store = self.store;
            self.dispatch = None;
            self.dispatch = Some((handle, store.deref_read(handle)?));
        }
        match &self.dispatch {
            Some((_, page)) => Ok(DispatchEntry::read(page, index)),
            None => Err(TribitError::Internal("dispatch guard missing".to_string())),
        }
    }

    fn leaf_word(&mut self, leaf: PageHandle, word: usize) -> Result<u64> {
        let handle = leaf.page((word / PAGE_WORDS) as u32);
        if !matches!(&self.leaf, Some((cached, _)) if *cached == handle) {
            let store = self.store;
            self.leaf = None;
            self.leaf = Some((handle, store.deref_read(handle)?));
        }
        match &self.leaf {
            Some((_, page)) => Ok(page[word % PAGE_WORDS]),
            None => Err(TribitError::Internal("leaf guard missing".to_string())),
        }
    }
}

/// A non-default key found by the walk.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Hit {
    pub key: u32,
    pub state: BitState,
    /// The leaf word holding the key.
    pub word: u64,
}

/// Finds the first non-default key `>= from`.
pub(crate) fn walk<S: PageStore, E: Encoding>(
    root: RootRef,
    enc: E,
    cache: &mut PageCache<'_, S>,
    from: u32,
) -> Result<Option<Hit>> {
    let start = BitmapKey(from);

    for r in start.root()..ROOT_COUNT {
        let dispatch = cache.root_slot(root, r)?;
        if dispatch.is_null() {
            continue;
        }

        let first = if r == start.root() { start.dispatch() } else { 0 };
        for d in first..DISPATCH_COUNT {
            let entry = cache.dispatch_entry(dispatch, d)?;
            if entry.leaf.is_null() {
                continue;
            }

            let offset = if r == start.root() && d == start.dispatch() {
                start.leaf_offset()
            } else {
                0
            };
            if let Some((leaf_offset, state, word)) = scan_leaf(enc, cache, entry.leaf, offset)? {
                return Ok(Some(Hit {
                    key: BitmapKey::from_parts(r, d, leaf_offset).as_u32(),
                    state,
                    word,
                }));
            }
        }
    }
    Ok(None)
}

/// Finds the first non-default slot at or after `offset` in one leaf.
fn scan_leaf<S: PageStore, E: Encoding>(
    enc: E,
    cache: &mut PageCache<'_, S>,
    leaf: PageHandle,
    offset: u32,
) -> Result<Option<(u32, BitState, u64)>> {
    let per_word = enc.keys_per_word();
    let mut index = (offset / per_word) as usize;
    let mut mask = enc.mask_from(offset % per_word);

    while index < enc.leaf_words() {
        let word = cache.leaf_word(leaf, index)?;
        let hits = enc.occupied(word) & mask;
        if hits != 0 {
            let slot = enc.slot_of(hits.trailing_zeros());
            let leaf_offset = index as u32 * per_word + slot;
            return Ok(Some((leaf_offset, enc.decode(word, slot), word)));
        }
        index += 1;
        mask = u64::MAX;
    }
    Ok(None)
}

/// Borrowing enumerator over `(key, state)` pairs in increasing key order.
///
/// Holds read guards on the current root, dispatch and leaf pages between
/// steps. `E` fixes the leaf encoding; see [`Plain`](crate::Plain),
/// [`Nullable`](crate::Nullable) and [`Dynamic`].
pub struct Enumerator<'a, S: PageStore, E: Encoding = Dynamic> {
    root: RootRef,
    enc: E,
    cache: PageCache<'a, S>,
    next_key: Option<u32>,
}

impl<'a, S: PageStore, E: Encoding> Enumerator<'a, S, E> {
    /// Creates an enumerator starting at `from`.
    ///
    /// Fails with `EncodingMismatch` if `E` cannot read the bitmap.
    pub fn new(map: &'a Bitmap<S>, from: u32) -> Result<Self> {
        let enc = E::for_bitmap(map.is_nullable())?;
        Ok(Self::with_encoding(map, enc, from))
    }

    pub(crate) fn with_encoding(map: &'a Bitmap<S>, enc: E, from: u32) -> Self {
        Self {
            root: map.root(),
            enc,
            cache: PageCache::new(map.store()),
            next_key: Some(from),
        }
    }

    /// Repositions on the first non-default key `>= key`. Moving backwards is
    /// allowed.
    pub fn seek(&mut self, key: u32) {
        self.next_key = Some(key);
    }

    /// Returns the lower bound of the next step, or None once the key space is
    /// exhausted.
    pub fn position(&self) -> Option<u32> {
        self.next_key
    }
}

impl<S: PageStore, E: Encoding> Iterator for Enumerator<'_, S, E> {
    type Item = Result<(u32, BitState)>;

    fn next(&mut self) -> Option<Self::Item> {
        let from = self.next_key?;
        match walk(self.root, self.enc, &mut self.cache, from) {
            Ok(Some(hit)) => {
                self.next_key = hit.key.checked_add(1);
                Some(Ok((hit.key, hit.state)))
            }
            Ok(None) => {
                self.next_key = None;
                None
            }
            Err(e) => {
                self.next_key = None;
                Some(Err(e))
            }
        }
    }
}

/// The leaf word behind the last key a cursor returned.
#[derive(Debug, Clone, Copy)]
struct CachedWord {
    /// Identity of the bitmap instance the word was read from.
    instance: u64,
    generation: u64,
    /// First key covered by the word.
    base: u32,
    word: u64,
}

/// Owned, re-validating cursor over `(key, state)` pairs in increasing key
/// order.
///
/// Its lower bound is the last returned key plus one. A key set above that
/// bound while the cursor is parked is returned by a later step; keys at or
/// below it never are. When stepped on the same bitmap instance whose
/// generation has not moved since the last step, hits inside the last leaf
/// word are served from a copy of that word without touching the store.
#[derive(Debug, Clone)]
pub struct Cursor<E: Encoding = Dynamic> {
    enc: E,
    next_key: Option<u32>,
    cached: Option<CachedWord>,
}

impl<E: Encoding> Cursor<E> {
    /// Creates a cursor for `map` starting at `from`.
    ///
    /// Fails with `EncodingMismatch` if `E` cannot read the bitmap.
    pub fn new<S: PageStore>(map: &Bitmap<S>, from: u32) -> Result<Self> {
        let enc = E::for_bitmap(map.is_nullable())?;
        Ok(Self::with_encoding(enc, from))
    }

    pub(crate) fn with_encoding(enc: E, from: u32) -> Self {
        Self {
            enc,
            next_key: Some(from),
            cached: None,
        }
    }

    /// Repositions on the first non-default key `>= key`. Moving backwards is
    /// allowed.
    pub fn seek(&mut self, key: u32) {
        self.next_key = Some(key);
    }

    /// Returns the lower bound of the next step, or None once the key space is
    /// exhausted.
    pub fn position(&self) -> Option<u32> {
        self.next_key
    }

    /// Returns the next non-default key and its state, reading `map` afresh.
    ///
    /// `Ok(None)` at the end of the bitmap leaves the position unchanged, so
    /// keys set later above it are still found.
    pub fn next<S: PageStore>(&mut self, map: &Bitmap<S>) -> Result<Option<(u32, BitState)>> {
        if self.enc.is_nullable() != map.is_nullable() {
            return Err(TribitError::EncodingMismatch {
                nullable: map.is_nullable(),
            });
        }
        let Some(from) = self.next_key else {
            return Ok(None);
        };

        if let Some(hit) = self.next_cached(map.instance(), map.generation(), from) {
            return Ok(Some(self.advance(hit, map.instance(), map.generation())));
        }

        let mut cache = PageCache::new(map.store().as_ref());
        match walk(map.root(), self.enc, &mut cache, from)? {
            Some(hit) => Ok(Some(self.advance(hit, map.instance(), map.generation()))),
            None => {
                self.cached = None;
                Ok(None)
            }
        }
    }

    /// Serves the next hit from the cached word if it is still current.
    fn next_cached(&self, instance: u64, generation: u64, from: u32) -> Option<Hit> {
        let cached = self.cached?;
        let per_word = self.enc.keys_per_word();
        if cached.instance != instance
            || cached.generation != generation
            || from < cached.base
            || from - cached.base >= per_word
        {
            return None;
        }

        let hits = self.enc.occupied(cached.word) & self.enc.mask_from(from - cached.base);
        if hits == 0 {
            return None;
        }
        let slot = self.enc.slot_of(hits.trailing_zeros());
        Some(Hit {
            key: cached.base + slot,
            state: self.enc.decode(cached.word, slot),
            word: cached.word,
        })
    }

    fn advance(&mut self, hit: Hit, instance: u64, generation: u64) -> (u32, BitState) {
        let per_word = self.enc.keys_per_word();
        self.cached = Some(CachedWord {
            instance,
            generation,
            base: hit.key & !(per_word - 1),
            word: hit.word,
        });
        self.next_key = hit.key.checked_add(1);
        (hit.key, hit.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::LEAF_KEYS;
    use crate::encoding::{Nullable, Plain};
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};
    use tribit_common::PagerConfig;
    use tribit_pager::BufferedPageStore;

    fn create_test_map(nullable: bool) -> (Bitmap<BufferedPageStore>, TempDir) {
        let dir = tempdir().unwrap();
        let config = PagerConfig {
            data_dir: dir.path().to_path_buf(),
            num_frames: 64,
            fsync_enabled: false,
            ..PagerConfig::default()
        };
        let store = Arc::new(BufferedPageStore::open(config).unwrap());
        (Bitmap::new(store, nullable).unwrap(), dir)
    }

    fn keys<S: PageStore, E: Encoding>(en: Enumerator<'_, S, E>) -> Vec<u32> {
        en.map(|r| r.unwrap().0).collect()
    }

    #[test]
    fn test_enumerate_empty() {
        let (map, _dir) = create_test_map(false);
        assert!(map.iter().next().is_none());

        let mut cursor = map.cursor(0);
        assert!(cursor.next(&map).unwrap().is_none());
        assert_eq!(cursor.position(), Some(0));
    }

    #[test]
    fn test_enumerate_skips_gaps() {
        let (mut map, _dir) = create_test_map(false);
        let set = [0u32, 63, 64, 32767, 32768, 1 << 24, 0xFF00_0000, u32::MAX];
        for key in set {
            map.set(key).unwrap();
        }

        assert_eq!(keys(map.iter()), set.to_vec());
        assert_eq!(keys(map.iter_from(65)), set[3..].to_vec());
        assert_eq!(keys(map.iter_from(u32::MAX)), vec![u32::MAX]);
    }

    #[test]
    fn test_enumerate_nullable_reports_false_entries() {
        let (mut map, _dir) = create_test_map(true);
        map.set(1).unwrap();
        map.reset(2).unwrap();
        map.set(40).unwrap();
        map.remove(40).unwrap();
        map.reset(LEAF_KEYS + 31).unwrap();

        let items: Vec<_> = map.iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            items,
            vec![
                (1, BitState::True),
                (2, BitState::False),
                (LEAF_KEYS + 31, BitState::False),
            ]
        );
    }

    #[test]
    fn test_nullable_second_leaf_page() {
        let (mut map, _dir) = create_test_map(true);
        // Word 600 of a nullable leaf lives on its second page
        let key = 600 * 32 + 5;
        map.set(key).unwrap();
        map.set(key + 1).unwrap();

        assert_eq!(keys(map.iter()), vec![key, key + 1]);
        assert_eq!(keys(map.iter_from(key + 1)), vec![key + 1]);
    }

    #[test]
    fn test_specialized_enumerators() {
        let (mut plain, _d1) = create_test_map(false);
        let (mut nullable, _d2) = create_test_map(true);
        for key in [5u32, 500, 50_000] {
            plain.set(key).unwrap();
            nullable.set(key).unwrap();
        }

        let en = plain.enumerator::<Plain>(0).unwrap();
        assert_eq!(keys(en), vec![5, 500, 50_000]);
        let en = nullable.enumerator::<Nullable>(6).unwrap();
        assert_eq!(keys(en), vec![500, 50_000]);

        assert!(matches!(
            plain.enumerator::<Nullable>(0),
            Err(TribitError::EncodingMismatch { nullable: false })
        ));
        assert!(Cursor::<Plain>::new(&nullable, 0).is_err());
        assert!(Cursor::<Nullable>::new(&nullable, 0).is_ok());
    }

    #[test]
    fn test_enumerator_seek_both_directions() {
        let (mut map, _dir) = create_test_map(false);
        for key in (0..100_000u32).step_by(1000) {
            map.set(key).unwrap();
        }

        let mut en = map.iter();
        en.seek(50_001);
        assert_eq!(en.next().unwrap().unwrap().0, 51_000);
        en.seek(0);
        assert_eq!(en.next().unwrap().unwrap().0, 0);
        en.seek(99_001);
        assert!(en.next().is_none());
        assert_eq!(en.position(), None);
    }

    #[test]
    fn test_cursor_sees_keys_set_ahead() {
        let (mut map, _dir) = create_test_map(false);
        map.set(10).unwrap();
        map.set(20).unwrap();

        let mut cursor = map.cursor(0);
        assert_eq!(cursor.next(&map).unwrap(), Some((10, BitState::True)));

        map.set(15).unwrap();
        map.set(5).unwrap();
        assert_eq!(cursor.next(&map).unwrap(), Some((15, BitState::True)));
        assert_eq!(cursor.next(&map).unwrap(), Some((20, BitState::True)));
        assert_eq!(cursor.next(&map).unwrap(), None);

        map.set(1 << 30).unwrap();
        assert_eq!(cursor.next(&map).unwrap(), Some((1 << 30, BitState::True)));
    }

    #[test]
    fn test_cursor_cached_word_invalidated_by_mutation() {
        let (mut map, _dir) = create_test_map(false);
        map.set(1).unwrap();
        map.set(3).unwrap();

        let mut cursor = map.cursor(0);
        assert_eq!(cursor.next(&map).unwrap().unwrap().0, 1);

        // Same word as the cached one: must not be served stale
        map.remove(3).unwrap();
        map.set(2).unwrap();
        assert_eq!(cursor.next(&map).unwrap().unwrap().0, 2);
        assert_eq!(cursor.next(&map).unwrap(), None);
    }

    #[test]
    fn test_cursor_cached_word_not_shared_across_bitmaps() {
        // Separate stores: both roots land on the same page number
        let (mut a, _d1) = create_test_map(false);
        let (mut b, _d2) = create_test_map(false);
        a.set(1).unwrap();
        a.set(3).unwrap();
        b.set(1).unwrap();
        b.set(5).unwrap();
        assert_eq!(a.root(), b.root());
        assert_eq!(a.generation(), b.generation());

        let mut cursor = a.cursor(0);
        assert_eq!(cursor.next(&a).unwrap().unwrap().0, 1);
        assert_eq!(cursor.next(&b).unwrap(), Some((5, BitState::True)));
        assert_eq!(cursor.next(&b).unwrap(), None);
    }

    #[test]
    fn test_cursor_cached_word_not_shared_across_instances() {
        let (mut map, _dir) = create_test_map(false);
        map.set(1).unwrap();
        map.set(3).unwrap();
        let mut other = Bitmap::open(Arc::clone(map.store()), map.root()).unwrap();

        let mut cursor = map.cursor(0);
        assert_eq!(cursor.next(&map).unwrap().unwrap().0, 1);

        // Mutating through the other handle leaves `map`'s generation alone
        other.remove(3).unwrap();
        other.set(2).unwrap();
        assert_eq!(cursor.next(&other).unwrap(), Some((2, BitState::True)));
        assert_eq!(cursor.next(&other).unwrap(), None);
    }

    #[test]
    fn test_cursor_rejects_other_encoding() {
        let (plain, _d1) = create_test_map(false);
        let (nullable, _d2) = create_test_map(true);

        let mut cursor = plain.cursor(0);
        assert!(matches!(
            cursor.next(&nullable),
            Err(TribitError::EncodingMismatch { nullable: true })
        ));
    }

    #[test]
    fn test_cursor_end_of_key_space() {
        let (mut map, _dir) = create_test_map(true);
        map.set(u32::MAX).unwrap();

        let mut cursor = map.cursor(u32::MAX);
        assert_eq!(cursor.next(&map).unwrap(), Some((u32::MAX, BitState::True)));
        assert_eq!(cursor.position(), None);
        assert_eq!(cursor.next(&map).unwrap(), None);
    }
}
