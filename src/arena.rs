//! Generational slot arena backing the map's entry records.
//!
//! Entries live in one block of slots acquired from the injected
//! [`SlotStorage`]; freed slots are recycled through an intrusive free list
//! and every reuse bumps the slot's generation, so a stale [`SlotRef`] can
//! never resolve to a different entry. Growth doubles the block: the new
//! block is acquired first, slots move over by index (references stay valid),
//! and the old block is released.

use core::mem;

use crate::storage::{SlotStorage, StorageExhausted};

const MIN_CAPACITY: usize = 8;
const RESERVED_INDEX: u32 = u32::MAX;

/// Reference to an arena slot, tagged with the generation it was created in.
///
/// The default value is the reserved reference: it never names a live slot,
/// and the map uses it as the chain sentinel and the empty-bucket marker.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SlotRef {
    index: u32,
    generation: u32,
}

impl SlotRef {
    /// The distinguished reference that no allocation ever receives.
    pub(crate) const RESERVED: SlotRef = SlotRef {
        index: RESERVED_INDEX,
        generation: u32::MAX,
    };
}

impl Default for SlotRef {
    fn default() -> Self {
        SlotRef::RESERVED
    }
}

enum Slot<T> {
    Free { next_free: Option<u32>, generation: u32 },
    Occupied { generation: u32, value: T },
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot::Free {
            next_free: None,
            generation: 0,
        }
    }
}

pub(crate) struct Arena<T> {
    slots: Box<[Slot<T>]>,
    free_head: Option<u32>,
    live: usize,
}

impl<T> Arena<T> {
    /// An empty arena. Does not touch storage until the first insert.
    pub(crate) fn new() -> Self {
        Arena {
            slots: Box::default(),
            free_head: None,
            live: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn get(&self, r: SlotRef) -> Option<&T> {
        match self.slots.get(r.index as usize)? {
            Slot::Occupied { generation, value } if *generation == r.generation => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, r: SlotRef) -> Option<&mut T> {
        match self.slots.get_mut(r.index as usize)? {
            Slot::Occupied { generation, value } if *generation == r.generation => Some(value),
            _ => None,
        }
    }

    /// Place `value` in a free slot, growing through `storage` if none is
    /// available. On growth failure the arena is left untouched.
    pub(crate) fn insert<A: SlotStorage>(
        &mut self,
        value: T,
        storage: &mut A,
    ) -> Result<SlotRef, StorageExhausted> {
        let index = match self.free_head {
            Some(index) => index,
            None => self.grow(storage)?,
        };
        let (next_free, generation) = match &self.slots[index as usize] {
            Slot::Free {
                next_free,
                generation,
            } => (*next_free, *generation),
            Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
        };
        self.free_head = next_free;
        self.slots[index as usize] = Slot::Occupied { generation, value };
        self.live += 1;
        Ok(SlotRef { index, generation })
    }

    /// Take the value out of a live slot. The slot's generation is bumped so
    /// `r` (and any copy of it) stops resolving, then the slot is recycled.
    pub(crate) fn remove(&mut self, r: SlotRef) -> Option<T> {
        let slot = self.slots.get_mut(r.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == r.generation => {
                let freed = mem::replace(
                    slot,
                    Slot::Free {
                        next_free: self.free_head,
                        generation: r.generation.wrapping_add(1),
                    },
                );
                self.free_head = Some(r.index);
                self.live -= 1;
                match freed {
                    Slot::Occupied { value, .. } => Some(value),
                    Slot::Free { .. } => None,
                }
            }
            _ => None,
        }
    }

    /// Double the slot block. Returns the first newly freed index.
    fn grow<A: SlotStorage>(&mut self, storage: &mut A) -> Result<u32, StorageExhausted> {
        let old_len = self.slots.len();
        // Index RESERVED_INDEX is never handed out.
        let new_cap = (old_len * 2).max(MIN_CAPACITY).min(RESERVED_INDEX as usize);
        if new_cap <= old_len {
            return Err(StorageExhausted::slots::<T>(new_cap));
        }
        let block: Box<[Slot<T>]> = storage.acquire(new_cap)?;
        let mut old = mem::replace(&mut self.slots, block);
        for (dst, src) in self.slots.iter_mut().zip(old.iter_mut()) {
            *dst = mem::take(src);
        }
        storage.release(old);
        for index in (old_len..new_cap).rev() {
            self.slots[index] = Slot::Free {
                next_free: self.free_head,
                generation: 0,
            };
            self.free_head = Some(index as u32);
        }
        Ok(old_len as u32)
    }

    /// Hand the slot block back to the strategy, dropping all live values.
    pub(crate) fn release_to<A: SlotStorage>(&mut self, storage: &mut A) {
        storage.release(mem::take(&mut self.slots));
        self.free_head = None;
        self.live = 0;
    }

    /// One-shot raw view of the slot block for the mutable iterator.
    pub(crate) fn raw_slots(&mut self) -> RawSlots<T> {
        RawSlots {
            base: self.slots.as_mut_ptr(),
            len: self.slots.len(),
        }
    }
}

/// Raw view over an arena's slot block. Each projection derives from the
/// stored base pointer, so yielding a reference to one slot leaves
/// references into every other slot untouched; reborrowing the whole arena
/// per entry would invalidate them.
pub(crate) struct RawSlots<T> {
    base: *mut Slot<T>,
    len: usize,
}

impl<T> RawSlots<T> {
    /// Resolve `r` to its live value.
    ///
    /// # Safety
    /// The arena must stay exclusively borrowed for `'a`, and a live slot
    /// must not be projected again while an earlier projection of it is
    /// still in use.
    pub(crate) unsafe fn get_mut<'a>(&mut self, r: SlotRef) -> Option<&'a mut T> {
        if r.index as usize >= self.len {
            return None;
        }
        let slot = &mut *self.base.add(r.index as usize);
        match slot {
            Slot::Occupied { generation, value } if *generation == r.generation => Some(value),
            _ => None,
        }
    }
}
