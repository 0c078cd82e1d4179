//! Chain-order iterators.
//!
//! All three walk the global chain, so iteration order is insertion order as
//! modified by bucket-front splicing and rehash replay, never bucket order.

use core::hash::{BuildHasher, Hash};
use core::iter::FusedIterator;
use core::marker::PhantomData;

use crate::arena::{Arena, RawSlots, SlotRef};
use crate::map::{ChainHashMap, Node, SENTINEL};
use crate::storage::SlotStorage;

/// Borrowing iterator over `(&K, &V)` in chain order.
pub struct Iter<'a, K, V> {
    pub(crate) nodes: &'a Arena<Node<K, V>>,
    pub(crate) front: SlotRef,
    pub(crate) back: SlotRef,
    pub(crate) remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.nodes.get(self.front)?;
        self.remaining -= 1;
        self.front = node.next;
        Some((&node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> DoubleEndedIterator for Iter<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.nodes.get(self.back)?;
        self.remaining -= 1;
        self.back = node.prev;
        Some((&node.key, &node.value))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            nodes: self.nodes,
            front: self.front,
            back: self.back,
            remaining: self.remaining,
        }
    }
}

/// Borrowing iterator over `(&K, &mut V)` in chain order.
///
/// Walks the arena through a raw slot view so each yielded `&mut V` can
/// carry the full iterator lifetime without invalidating earlier ones.
pub struct IterMut<'a, K, V> {
    pub(crate) slots: RawSlots<Node<K, V>>,
    pub(crate) front: SlotRef,
    pub(crate) back: SlotRef,
    pub(crate) remaining: usize,
    pub(crate) _marker: PhantomData<&'a mut Arena<Node<K, V>>>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        // SAFETY: the iterator exclusively borrows the map for 'a, and the
        // remaining counter caps the walk at `len` distinct chain nodes, so
        // no slot is projected twice.
        let node = unsafe { self.slots.get_mut(self.front) }?;
        self.remaining -= 1;
        self.front = node.next;
        Some((&node.key, &mut node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> DoubleEndedIterator for IterMut<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        // SAFETY: as in `next`.
        let node = unsafe { self.slots.get_mut(self.back) }?;
        self.remaining -= 1;
        self.back = node.prev;
        Some((&node.key, &mut node.value))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}
impl<K, V> FusedIterator for IterMut<'_, K, V> {}

/// Draining iterator over owned `(K, V)` in chain order.
///
/// Entries still in the map when the iterator drops are dropped with it, and
/// the map's blocks go back through its storage strategy.
pub struct IntoIter<K, V, S, A: SlotStorage> {
    pub(crate) map: ChainHashMap<K, V, S, A>,
}

impl<K, V, S, A> Iterator for IntoIter<K, V, S, A>
where
    K: Eq + Hash,
    S: BuildHasher,
    A: SlotStorage,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let head = self.map.head;
        if head == SENTINEL {
            return None;
        }
        self.map.detach(head)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.map.len, Some(self.map.len))
    }
}

impl<K, V, S, A> DoubleEndedIterator for IntoIter<K, V, S, A>
where
    K: Eq + Hash,
    S: BuildHasher,
    A: SlotStorage,
{
    fn next_back(&mut self) -> Option<Self::Item> {
        let tail = self.map.tail;
        if tail == SENTINEL {
            return None;
        }
        self.map.detach(tail)
    }
}

impl<K, V, S, A> ExactSizeIterator for IntoIter<K, V, S, A>
where
    K: Eq + Hash,
    S: BuildHasher,
    A: SlotStorage,
{
}

impl<K, V, S, A> FusedIterator for IntoIter<K, V, S, A>
where
    K: Eq + Hash,
    S: BuildHasher,
    A: SlotStorage,
{
}
