//! Pluggable slot storage: the narrow allocation contract consumed by the
//! arena and the bucket index.
//!
//! The map core only ever asks a strategy for "a block of `count` slots sized
//! for `T`" and hands blocks back when it is done with them. Nothing else is
//! assumed: a strategy may reclaim released space immediately, lazily, or not
//! at all.

use thiserror::Error;

/// Returned when a storage strategy cannot satisfy an acquire request.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("slot storage exhausted: requested {requested} slots ({bytes} bytes)")]
pub struct StorageExhausted {
    /// Number of slots that were requested.
    pub requested: usize,
    /// Size of the request in bytes.
    pub bytes: usize,
}

impl StorageExhausted {
    pub(crate) fn slots<T>(count: usize) -> Self {
        StorageExhausted {
            requested: count,
            bytes: count.saturating_mul(core::mem::size_of::<T>()),
        }
    }
}

/// Allocation strategy injected into [`ChainHashMap`](crate::ChainHashMap).
///
/// `acquire` hands out a block of `count` slots, every slot at `T::default()`;
/// the caller constructs real contents afterwards. `release` returns a block
/// previously handed out. Callers must not assume a release frees capacity
/// right away.
pub trait SlotStorage {
    /// Acquire a block of `count` default-initialized slots.
    fn acquire<T: Default>(&mut self, count: usize) -> Result<Box<[T]>, StorageExhausted>;

    /// Return a previously acquired block to the strategy.
    fn release<T>(&mut self, block: Box<[T]>);
}

/// Default strategy backed by the global heap. Never reports exhaustion.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapStorage;

impl SlotStorage for HeapStorage {
    fn acquire<T: Default>(&mut self, count: usize) -> Result<Box<[T]>, StorageExhausted> {
        Ok((0..count).map(|_| T::default()).collect())
    }

    fn release<T>(&mut self, block: Box<[T]>) {
        drop(block);
    }
}

/// Heap-backed strategy with a byte budget. Acquisition beyond the budget
/// fails with [`StorageExhausted`]; releasing a block returns its bytes to
/// the budget.
///
/// Useful for capping a map's footprint and for exercising the exhaustion
/// paths in tests.
#[derive(Clone, Debug)]
pub struct BudgetStorage {
    budget: usize,
    in_use: usize,
}

impl BudgetStorage {
    /// Create a strategy that will hand out at most `budget` bytes at a time.
    pub fn new(budget: usize) -> Self {
        BudgetStorage { budget, in_use: 0 }
    }

    /// Total byte budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Bytes currently handed out.
    pub fn in_use(&self) -> usize {
        self.in_use
    }
}

impl SlotStorage for BudgetStorage {
    fn acquire<T: Default>(&mut self, count: usize) -> Result<Box<[T]>, StorageExhausted> {
        let bytes = count.saturating_mul(core::mem::size_of::<T>());
        if bytes > self.budget - self.in_use {
            return Err(StorageExhausted {
                requested: count,
                bytes,
            });
        }
        self.in_use += bytes;
        Ok((0..count).map(|_| T::default()).collect())
    }

    fn release<T>(&mut self, block: Box<[T]>) {
        self.in_use = self
            .in_use
            .saturating_sub(core::mem::size_of_val::<[T]>(&block));
        drop(block);
    }
}
