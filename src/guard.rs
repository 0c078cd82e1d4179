//! Debug-only guard against reentering the map through user key code.
//!
//! The map invokes user code (`K: Hash`/`Eq`, value-producing closures)
//! while its chain and bucket index may be transiently inconsistent.
//! Reentering a map method from inside that user code is a logic error; in
//! debug builds the flag catches it with a panic, in release builds this
//! compiles to a near-zero no-op.
//!
//! The flag cell is shared (`Rc`) rather than borrowed so the section taken
//! at a method's entry holds no borrow of the map; the method body is free
//! to take `&mut self` while the section is alive, and the section still
//! clears the flag on unwind.

use core::marker::PhantomData;
#[cfg(debug_assertions)]
use std::cell::Cell;
#[cfg(debug_assertions)]
use std::rc::Rc;

pub(crate) struct ActivityFlag {
    #[cfg(debug_assertions)]
    busy: Rc<Cell<bool>>,
    // Keep !Send + !Sync in line with single-threaded design.
    _nosend: PhantomData<*mut ()>,
}

impl ActivityFlag {
    pub(crate) fn new() -> Self {
        ActivityFlag {
            #[cfg(debug_assertions)]
            busy: Rc::new(Cell::new(false)),
            _nosend: PhantomData,
        }
    }

    /// Mark the map busy for the duration of the returned section. In debug
    /// builds, panics if a guarded method is already on the stack.
    #[inline]
    pub(crate) fn assert_idle(&self) -> ActiveSection {
        #[cfg(debug_assertions)]
        {
            assert!(
                !self.busy.get(),
                "map method re-entered through user key code"
            );
            self.busy.set(true);
            return ActiveSection {
                flag: Rc::clone(&self.busy),
            };
        }

        #[cfg(not(debug_assertions))]
        {
            return ActiveSection { _z: PhantomData };
        }
    }
}

/// RAII section marker returned by [`ActivityFlag::assert_idle`].
pub(crate) struct ActiveSection {
    #[cfg(debug_assertions)]
    flag: Rc<Cell<bool>>,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<()>,
}

impl Drop for ActiveSection {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        self.flag.set(false);
    }
}
