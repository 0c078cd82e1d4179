//! chain-hashmap: A single-threaded hash map that threads every entry
//! onto one global doubly linked chain and allocates through a pluggable
//! slot-storage strategy.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: combine O(1) average keyed access with a stable, cheap
//!   whole-map iteration order, built in small layers so each piece can
//!   be reasoned about independently.
//! - Layers:
//!   - SlotStorage (storage.rs): the allocation seam. Every block the
//!     map holds (entry slots, bucket index, rehash scratch) is acquired
//!     from and released to the injected strategy; HeapStorage is the
//!     infallible default, BudgetStorage caps total bytes.
//!   - Arena<T> (arena.rs): generational slot arena over one acquired
//!     block. Freed slots recycle through a free list and reuse bumps
//!     the slot's generation, so stale SlotRefs miss instead of
//!     aliasing.
//!   - ChainHashMap<K, V, S, A> (map.rs): a bucket index over the arena
//!     plus the global chain, closed into a ring by a virtual sentinel.
//!     Each bucket's members form a contiguous chain segment headed by
//!     the bucket's recorded representative.
//!   - Iterators (iter.rs): chain-order Iter / IterMut / IntoIter, all
//!     double ended and exact sized.
//!
//! Constraints
//! - Single-threaded: `!Send`/`!Sync` by design (no atomics).
//! - Every block of memory flows through the injected SlotStorage, so a
//!   budgeted strategy can bound the map's footprint and observe it.
//! - Stable positions: `Handle`s survive inserts and rehashes and die
//!   with their entry.
//!
//! Key invariants
//! - The chain is the source of truth: it visits every live entry
//!   exactly once, in an order that rehashing preserves within each
//!   bucket.
//! - A bucket's slot names the chain-first member of its segment, or
//!   the sentinel when the bucket is empty; lookups scan forward until
//!   the segment ends.
//! - `len <= max_load_factor * bucket_count` is re-established by every
//!   insert; growth runs before the new entry is linked, so a freshly
//!   inserted entry lands in the final index.
//! - Storage exhaustion surfaces as `Err(StorageExhausted)` from the
//!   operation that needed the block, with the map observably
//!   unchanged.
//!
//! Reentrancy policy
//! - Map methods invoke user code via `K: Eq/Hash` during probing and
//!   via value-producing closures; a debug-only activity flag
//!   (guard.rs) panics on nested entry while internal state can be
//!   transiently inconsistent. Release builds carry no check.
//!
//! Hasher and rehashing invariants
//! - Each entry stores its `u64` hash computed once at insert and
//!   indexing always uses the stored hash; `K: Hash` is never invoked
//!   after insertion, so rehashing never calls into user code.
//!
//! Notes and non-goals
//! - Presence-keeping inserts: `try_insert` on a present key keeps the
//!   stored value; there is no upserting entry point.
//! - No `Clone` for the map (a storage strategy need not be clonable)
//!   and no infallible `Extend`/`FromIterator` (insertion can fail).
//! - Keys are immutable post-insert; there is no `key_mut`.

mod arena;
mod guard;
mod iter;
mod map;
#[cfg(test)]
mod map_proptest;
mod storage;

// Public surface
pub use iter::{IntoIter, Iter, IterMut};
pub use map::{ChainHashMap, Handle, InvalidLoadFactor, InvalidRange};
pub use storage::{BudgetStorage, HeapStorage, SlotStorage, StorageExhausted};
