//! ChainHashMap: bucketed lookup over a single global entry chain.
//!
//! Two structures share one arena of entry records:
//!
//! - the **bucket index**, a block of [`SlotRef`]s where slot `i` names the
//!   chain-first node of bucket `i`'s segment (or the sentinel when the
//!   bucket is empty), and
//! - the **global chain**, a doubly linked list threading every live entry,
//!   closed into a ring by a sentinel. The chain is the source of truth for
//!   membership and iteration order; the index is a rebuildable cache.
//!
//! Each bucket's members form one contiguous chain segment, so a lookup scans
//! forward from the bucket's recorded node and stops as soon as a visited
//! node's own bucket differs. Every entry carries its hash computed once at
//! insert; `K: Hash` is never invoked again, not even during rehash.

use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use core::mem;
use std::collections::hash_map::RandomState;

use thiserror::Error;

use crate::arena::{Arena, SlotRef};
use crate::guard::ActivityFlag;
use crate::iter::{IntoIter, Iter, IterMut};
use crate::storage::{HeapStorage, SlotStorage, StorageExhausted};

/// The chain position that is its own neighbor when the map is empty, the
/// `end()` of every traversal, and the empty-bucket marker.
pub(crate) const SENTINEL: SlotRef = SlotRef::RESERVED;

const DEFAULT_BUCKETS: usize = 16;

/// Stable position of a live entry.
///
/// A handle stays valid across inserts and rehashes (entries are relinked,
/// never moved) and is invalidated by the entry's erasure; a stale handle
/// simply stops resolving, even if its slot is later reused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(pub(crate) SlotRef);

impl Handle {
    /// Borrow the entry's key, if the handle is still live in `map`.
    pub fn key<'a, K, V, S, A: SlotStorage>(
        &self,
        map: &'a ChainHashMap<K, V, S, A>,
    ) -> Option<&'a K> {
        map.nodes.get(self.0).map(|n| &n.key)
    }

    /// Borrow the entry's value, if the handle is still live in `map`.
    pub fn value<'a, K, V, S, A: SlotStorage>(
        &self,
        map: &'a ChainHashMap<K, V, S, A>,
    ) -> Option<&'a V> {
        map.nodes.get(self.0).map(|n| &n.value)
    }

    /// Mutably borrow the entry's value, if the handle is still live in `map`.
    pub fn value_mut<'a, K, V, S, A: SlotStorage>(
        &self,
        map: &'a mut ChainHashMap<K, V, S, A>,
    ) -> Option<&'a mut V> {
        map.nodes.get_mut(self.0).map(|n| &mut n.value)
    }
}

/// Rejected configuration for [`ChainHashMap::set_max_load_factor`].
#[derive(Clone, Copy, Debug, PartialEq, Error)]
#[error("max load factor must be a positive finite number, got {0}")]
pub struct InvalidLoadFactor(pub f32);

/// Rejected precondition for [`ChainHashMap::remove_range`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum InvalidRange {
    /// The start position does not name a live entry.
    #[error("range start is not a live entry")]
    StaleStart,
    /// The end position is not reachable from the start in chain order.
    #[error("range end is not reachable from the start in chain order")]
    Disconnected,
}

pub(crate) struct Node<K, V> {
    pub(crate) prev: SlotRef,
    pub(crate) next: SlotRef,
    pub(crate) hash: u64,
    pub(crate) key: K,
    pub(crate) value: V,
}

/// Hash map with O(1) average lookup and a stable global iteration chain.
///
/// `S` picks the hasher (any [`BuildHasher`]); `A` picks the [`SlotStorage`]
/// strategy every block of memory comes from.
pub struct ChainHashMap<K, V, S = RandomState, A: SlotStorage = HeapStorage> {
    hasher: S,
    storage: A,
    pub(crate) nodes: Arena<Node<K, V>>,
    /// Empty until the first insert; slot `i` is the chain-first node of
    /// bucket `i` or [`SENTINEL`].
    buckets: Box<[SlotRef]>,
    initial_buckets: usize,
    max_load_factor: f32,
    /// Sentinel links: `head` is sentinel.next, `tail` is sentinel.prev.
    pub(crate) head: SlotRef,
    pub(crate) tail: SlotRef,
    pub(crate) len: usize,
    guard: ActivityFlag,
}

impl<K, V> ChainHashMap<K, V>
where
    K: Eq + Hash,
{
    /// An empty map with the default hasher, heap storage, and bucket count.
    pub fn new() -> Self {
        Self::with_hasher_in(RandomState::default(), HeapStorage)
    }

    /// An empty map that will build its index with `buckets` buckets.
    pub fn with_buckets(buckets: usize) -> Self {
        Self::with_buckets_hasher_in(buckets, RandomState::default(), HeapStorage)
    }
}

impl<K, V> Default for ChainHashMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S, A> ChainHashMap<K, V, S, A>
where
    A: SlotStorage,
{
    /// An empty map with an explicit hasher and storage strategy.
    ///
    /// Does not allocate: the index and arena are acquired from `storage` at
    /// the first insert.
    pub fn with_hasher_in(hasher: S, storage: A) -> Self {
        Self::with_buckets_hasher_in(DEFAULT_BUCKETS, hasher, storage)
    }

    /// An empty map with an explicit initial bucket count, hasher, and
    /// storage strategy.
    pub fn with_buckets_hasher_in(buckets: usize, hasher: S, storage: A) -> Self {
        ChainHashMap {
            hasher,
            storage,
            nodes: Arena::new(),
            buckets: Box::default(),
            initial_buckets: buckets.max(1),
            max_load_factor: 0.67,
            head: SENTINEL,
            tail: SENTINEL,
            len: 0,
            guard: ActivityFlag::new(),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current bucket count (the configured count before the index is built).
    pub fn bucket_count(&self) -> usize {
        if self.buckets.is_empty() {
            self.initial_buckets
        } else {
            self.buckets.len()
        }
    }

    /// `len / bucket_count`.
    pub fn load_factor(&self) -> f32 {
        self.len as f32 / self.bucket_count() as f32
    }

    pub fn max_load_factor(&self) -> f32 {
        self.max_load_factor
    }

    /// Set the load-factor bound. Rejects non-positive and non-finite values
    /// without touching the map; a lowered bound takes effect at the next
    /// insert.
    pub fn set_max_load_factor(&mut self, mlf: f32) -> Result<(), InvalidLoadFactor> {
        if !(mlf.is_finite() && mlf > 0.0) {
            return Err(InvalidLoadFactor(mlf));
        }
        self.max_load_factor = mlf;
        Ok(())
    }

    /// Borrow the storage strategy, e.g. to inspect a budget.
    pub fn storage(&self) -> &A {
        &self.storage
    }

    /// Entries in chain order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            nodes: &self.nodes,
            front: self.head,
            back: self.tail,
            remaining: self.len,
        }
    }

    /// Entries in chain order, values mutable.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            front: self.head,
            back: self.tail,
            remaining: self.len,
            slots: self.nodes.raw_slots(),
            _marker: core::marker::PhantomData,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.iter_mut().map(|(_, v)| v)
    }

    // ---- chain primitives -------------------------------------------------
    //
    // The sentinel is not an arena slot; its links live in `head`/`tail`.
    // These helpers fold that into ordinary link reads and writes.

    fn prev_of(&self, p: SlotRef) -> SlotRef {
        if p == SENTINEL {
            self.tail
        } else {
            self.nodes.get(p).map_or(SENTINEL, |n| n.prev)
        }
    }

    fn set_next(&mut self, p: SlotRef, to: SlotRef) {
        if p == SENTINEL {
            self.head = to;
        } else if let Some(n) = self.nodes.get_mut(p) {
            n.next = to;
        }
    }

    fn set_prev(&mut self, p: SlotRef, to: SlotRef) {
        if p == SENTINEL {
            self.tail = to;
        } else if let Some(n) = self.nodes.get_mut(p) {
            n.prev = to;
        }
    }

    /// Link `node` into the chain immediately before `at` (`SENTINEL` means
    /// at the tail).
    fn splice_before(&mut self, node: SlotRef, at: SlotRef) {
        let prev = self.prev_of(at);
        if let Some(n) = self.nodes.get_mut(node) {
            n.prev = prev;
            n.next = at;
        }
        self.set_next(prev, node);
        self.set_prev(at, node);
    }

    /// Link `node` into the chain immediately after `at`.
    fn splice_after(&mut self, node: SlotRef, at: SlotRef) {
        let next = if at == SENTINEL {
            self.head
        } else {
            self.nodes.get(at).map_or(SENTINEL, |n| n.next)
        };
        if let Some(n) = self.nodes.get_mut(node) {
            n.prev = at;
            n.next = next;
        }
        self.set_next(at, node);
        self.set_prev(next, node);
    }
}

impl<K, V, S, A> ChainHashMap<K, V, S, A>
where
    K: Eq + Hash,
    S: BuildHasher,
    A: SlotStorage,
{
    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    /// Bucket a key would map into at the current bucket count.
    pub fn bucket<Q>(&self, q: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
    {
        (self.make_hash(q) % self.bucket_count() as u64) as usize
    }

    /// Length of a bucket's chain segment, or `None` for an out-of-range
    /// bucket.
    pub fn bucket_len(&self, bucket: usize) -> Option<usize> {
        if bucket >= self.bucket_count() {
            return None;
        }
        if self.buckets.is_empty() {
            return Some(0);
        }
        let mut count = 0;
        let mut cur = self.buckets[bucket];
        while let Some(node) = self.nodes.get(cur) {
            if self.bucket_of(node.hash) != bucket {
                break;
            }
            count += 1;
            cur = node.next;
        }
        Some(count)
    }

    /// Scan the target bucket's segment for `q`. The segment is contiguous,
    /// so leaving it means "not found"; an empty bucket points at the
    /// sentinel and terminates immediately.
    fn locate<Q>(&self, hash: u64, q: &Q) -> Option<SlotRef>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        if self.buckets.is_empty() {
            return None;
        }
        let bucket = self.bucket_of(hash);
        let mut cur = self.buckets[bucket];
        while let Some(node) = self.nodes.get(cur) {
            if self.bucket_of(node.hash) != bucket {
                break;
            }
            if node.hash == hash && node.key.borrow() == q {
                return Some(cur);
            }
            cur = node.next;
        }
        None
    }

    /// Position of `q`'s entry, if present.
    pub fn find<Q>(&self, q: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _active = self.guard.assert_idle();
        self.locate(self.make_hash(q), q).map(Handle)
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _active = self.guard.assert_idle();
        self.locate(self.make_hash(q), q).is_some()
    }

    /// Borrow the value stored for `q`. `None` is the key-not-found signal
    /// and never mutates the map.
    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _active = self.guard.assert_idle();
        let r = self.locate(self.make_hash(q), q)?;
        self.nodes.get(r).map(|n| &n.value)
    }

    pub fn get_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _active = self.guard.assert_idle();
        let r = self.locate(self.make_hash(q), q)?;
        self.nodes.get_mut(r).map(|n| &mut n.value)
    }

    /// Insert `key -> value` unless the key is already present.
    ///
    /// Returns the entry's position and whether an insert happened; when the
    /// key was present the stored value is left untouched. Storage exhaustion
    /// leaves the map observably unchanged.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<(Handle, bool), StorageExhausted> {
        let _active = self.guard.assert_idle();
        let hash = self.make_hash(&key);
        if let Some(existing) = self.locate(hash, &key) {
            return Ok((Handle(existing), false));
        }
        let node = self.insert_new(hash, key, value)?;
        Ok((Handle(node), true))
    }

    /// Value for `key`, inserting `make()` first if the key is absent. The
    /// closure runs only on an actual insert.
    pub fn get_or_insert_with<F>(&mut self, key: K, make: F) -> Result<&mut V, StorageExhausted>
    where
        F: FnOnce() -> V,
    {
        let _active = self.guard.assert_idle();
        let hash = self.make_hash(&key);
        let node = match self.locate(hash, &key) {
            Some(existing) => existing,
            None => self.insert_new(hash, key, make())?,
        };
        match self.nodes.get_mut(node) {
            Some(n) => Ok(&mut n.value),
            None => unreachable!("located or freshly inserted slot is live"),
        }
    }

    /// The `map[key]` accessor: default-inserts on a missing key.
    pub fn get_or_default(&mut self, key: K) -> Result<&mut V, StorageExhausted>
    where
        V: Default,
    {
        self.get_or_insert_with(key, V::default)
    }

    /// Insert every pair, keeping the first value for keys seen twice and for
    /// keys already present.
    pub fn try_extend<I>(&mut self, pairs: I) -> Result<(), StorageExhausted>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let _active = self.guard.assert_idle();
        for (key, value) in pairs {
            let hash = self.make_hash(&key);
            if self.locate(hash, &key).is_none() {
                self.insert_new(hash, key, value)?;
            }
        }
        Ok(())
    }

    /// Remove `q`'s entry, returning its value.
    pub fn remove<Q>(&mut self, q: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.remove_entry(q).map(|(_, v)| v)
    }

    /// Remove `q`'s entry, returning the owned pair. Absence is a no-op
    /// signaled by `None`.
    pub fn remove_entry<Q>(&mut self, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _active = self.guard.assert_idle();
        let r = self.locate(self.make_hash(q), q)?;
        self.detach(r)
    }

    /// Remove the entry at `position`. `None` if the handle is stale.
    pub fn remove_at(&mut self, position: Handle) -> Option<(K, V)> {
        let _active = self.guard.assert_idle();
        self.detach(position.0)
    }

    /// Remove `[first, last)` in chain order; `None` for `last` means through
    /// the tail. The range is validated before anything is erased.
    pub fn remove_range(
        &mut self,
        first: Handle,
        last: Option<Handle>,
    ) -> Result<usize, InvalidRange> {
        let _active = self.guard.assert_idle();
        if self.nodes.get(first.0).is_none() {
            return Err(InvalidRange::StaleStart);
        }
        let stop = match last {
            Some(h) => h.0,
            None => SENTINEL,
        };
        // Walk forward to prove `stop` is reachable before touching anything.
        let mut cur = first.0;
        while cur != stop {
            match self.nodes.get(cur) {
                Some(node) => cur = node.next,
                None => return Err(InvalidRange::Disconnected),
            }
        }
        let mut removed = 0;
        let mut cur = first.0;
        while cur != stop {
            let next = self.nodes.get(cur).map_or(stop, |n| n.next);
            self.detach(cur);
            removed += 1;
            cur = next;
        }
        Ok(removed)
    }

    /// Remove every entry. Keeps the acquired blocks for reuse; afterwards
    /// the map behaves like a freshly built one.
    pub fn clear(&mut self) {
        let _active = self.guard.assert_idle();
        while self.head != SENTINEL {
            let head = self.head;
            self.detach(head);
        }
    }

    /// Ensure the index has room for `headroom` more entries within the
    /// load-factor bound, rebuilding it if not. A no-op while the bound
    /// already holds.
    pub fn reserve(&mut self, headroom: usize) -> Result<(), StorageExhausted> {
        let _active = self.guard.assert_idle();
        self.grow(headroom)
    }

    /// Same contract as [`reserve`](Self::reserve), kept under the name the
    /// operation is usually known by.
    pub fn rehash(&mut self, headroom: usize) -> Result<(), StorageExhausted> {
        let _active = self.guard.assert_idle();
        self.grow(headroom)
    }

    // ---- internals --------------------------------------------------------

    fn ensure_buckets(&mut self) -> Result<(), StorageExhausted> {
        if self.buckets.is_empty() {
            // Freshly acquired slots default to SENTINEL: all buckets empty.
            self.buckets = self.storage.acquire(self.initial_buckets)?;
        }
        Ok(())
    }

    /// Splice a new entry in front of its bucket's segment.
    ///
    /// The record is constructed off-chain before the load-factor bound is
    /// checked: a storage failure on either block (entry slots or the
    /// rebuilt index) must leave the chain untouched, so the index rebuild
    /// is only reached once the record exists and can be rolled back. Growth
    /// still runs before the splice, so the entry lands in the final index.
    fn insert_new(&mut self, hash: u64, key: K, value: V) -> Result<SlotRef, StorageExhausted> {
        self.ensure_buckets()?;
        let node = self.nodes.insert(
            Node {
                prev: SENTINEL,
                next: SENTINEL,
                hash,
                key,
                value,
            },
            &mut self.storage,
        )?;
        if exceeds_load_bound(self.len + 1, self.max_load_factor, self.buckets.len()) {
            if let Err(exhausted) = self.grow(1) {
                self.nodes.remove(node);
                return Err(exhausted);
            }
        }
        let bucket = self.bucket_of(hash);
        let at = self.buckets[bucket];
        self.splice_before(node, at);
        // The new node is now the segment's chain-first member; the slot must
        // follow it or forward scans would start past it.
        self.buckets[bucket] = node;
        self.len += 1;
        Ok(node)
    }

    /// Unlink one entry: repair the bucket slot, bypass the node's neighbors,
    /// then recycle its arena slot.
    pub(crate) fn detach(&mut self, r: SlotRef) -> Option<(K, V)> {
        let (hash, prev, next) = {
            let node = self.nodes.get(r)?;
            (node.hash, node.prev, node.next)
        };
        if !self.buckets.is_empty() {
            let bucket = self.bucket_of(hash);
            if self.buckets[bucket] == r {
                // Advance the representative to the next segment member, or
                // mark the bucket empty.
                let successor_stays = self
                    .nodes
                    .get(next)
                    .map_or(false, |n| self.bucket_of(n.hash) == bucket);
                self.buckets[bucket] = if successor_stays { next } else { SENTINEL };
            }
        }
        self.set_next(prev, next);
        self.set_prev(next, prev);
        let node = self.nodes.remove(r)?;
        self.len -= 1;
        Some((node.key, node.value))
    }

    /// No-op while `len + headroom` fits the bound; otherwise rebuild the
    /// index at `max(2 * (len + headroom), ceil((len + headroom) / mlf))`.
    fn grow(&mut self, headroom: usize) -> Result<(), StorageExhausted> {
        let demand = self.len + headroom;
        if self.buckets.is_empty() {
            // Index not built yet: raise the initial size so the first insert
            // starts inside the bound.
            if exceeds_load_bound(demand, self.max_load_factor, self.initial_buckets) {
                let needed = (demand as f64 / self.max_load_factor as f64).ceil() as usize;
                self.initial_buckets = (2 * demand).max(needed);
            }
            return Ok(());
        }
        if !exceeds_load_bound(demand, self.max_load_factor, self.buckets.len()) {
            return Ok(());
        }
        let needed = (demand as f64 / self.max_load_factor as f64).ceil() as usize;
        self.rebuild_index((2 * demand).max(needed).max(1))
    }

    /// Rebuild the bucket index at `new_count` buckets in one pass over the
    /// chain, reusing each entry's cached hash.
    ///
    /// The chain is replayed front to back into a fresh ring: a bucket's
    /// first member is appended at the global tail (and becomes the
    /// representative), later members are spliced after the segment's running
    /// tail. Relative order within every bucket is preserved and segments
    /// appear in first-appearance order. Both blocks are acquired up front,
    /// so an exhausted strategy leaves the old index and chain intact.
    fn rebuild_index(&mut self, new_count: usize) -> Result<(), StorageExhausted> {
        debug_assert!(new_count > self.buckets.len());
        let new_buckets: Box<[SlotRef]> = self.storage.acquire(new_count)?;
        let mut segment_tails: Box<[SlotRef]> = match self.storage.acquire(new_count) {
            Ok(block) => block,
            Err(exhausted) => {
                self.storage.release(new_buckets);
                return Err(exhausted);
            }
        };
        let old_buckets = mem::replace(&mut self.buckets, new_buckets);

        let mut cur = self.head;
        self.head = SENTINEL;
        self.tail = SENTINEL;
        while cur != SENTINEL {
            let (hash, next) = match self.nodes.get(cur) {
                Some(node) => (node.hash, node.next),
                None => break,
            };
            let bucket = (hash % new_count as u64) as usize;
            if self.buckets[bucket] == SENTINEL {
                self.splice_before(cur, SENTINEL);
                self.buckets[bucket] = cur;
            } else {
                self.splice_after(cur, segment_tails[bucket]);
            }
            segment_tails[bucket] = cur;
            cur = next;
        }

        self.storage.release(old_buckets);
        self.storage.release(segment_tails);
        Ok(())
    }
}

/// Compared in f64: past 2^24 entries an f32 comparison can round the
/// boundary away and skip a required growth.
fn exceeds_load_bound(demand: usize, max_load_factor: f32, buckets: usize) -> bool {
    demand as f64 > max_load_factor as f64 * buckets as f64
}

impl<K, V, S, A> core::fmt::Debug for ChainHashMap<K, V, S, A>
where
    K: core::fmt::Debug,
    V: core::fmt::Debug,
    A: SlotStorage,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S, A: SlotStorage> Drop for ChainHashMap<K, V, S, A> {
    fn drop(&mut self) {
        // Route the blocks back through the strategy so budget-style
        // strategies see their bytes returned.
        self.nodes.release_to(&mut self.storage);
        let buckets = mem::take(&mut self.buckets);
        self.storage.release(buckets);
    }
}

impl<'a, K, V, S, A: SlotStorage> IntoIterator for &'a ChainHashMap<K, V, S, A> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

impl<'a, K, V, S, A: SlotStorage> IntoIterator for &'a mut ChainHashMap<K, V, S, A> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> IterMut<'a, K, V> {
        self.iter_mut()
    }
}

impl<K, V, S, A> IntoIterator for ChainHashMap<K, V, S, A>
where
    K: Eq + Hash,
    S: BuildHasher,
    A: SlotStorage,
{
    type Item = (K, V);
    type IntoIter = IntoIter<K, V, S, A>;

    fn into_iter(self) -> IntoIter<K, V, S, A> {
        IntoIter { map: self }
    }
}
