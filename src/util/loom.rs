//! A thin shim so the rest of the crate can be written once and either run
//! against `std` or, under `cfg(loom)`, against `loom`'s model-checked
//! primitives. Every module that touches shared mutable state reaches for
//! `crate::loom::*` instead of `std::*` directly.

#[cfg(loom)]
pub use loom::*;

#[cfg(not(loom))]
pub use std::{hint, sync, thread};

#[cfg(not(loom))]
pub mod cell {
    pub use std::cell::Cell;
    use std::cell::UnsafeCell as StdUnsafeCell;

    #[repr(transparent)]
    pub struct UnsafeCell<T: ?Sized> {
        inner: StdUnsafeCell<T>,
    }

    impl<T> UnsafeCell<T> {
        #[inline(always)]
        pub fn new(value: T) -> Self {
            Self {
                inner: StdUnsafeCell::new(value),
            }
        }
    }

    impl<T: ?Sized> UnsafeCell<T> {
        #[inline(always)]
        pub fn with<F, R>(&self, f: F) -> R
        where
            F: FnOnce(*const T) -> R,
        {
            f(self.inner.get())
        }

        #[inline(always)]
        pub fn with_mut<F, R>(&self, f: F) -> R
        where
            F: FnOnce(*mut T) -> R,
        {
            f(self.inner.get())
        }

        #[inline(always)]
        pub fn get_mut(&mut self) -> &mut T {
            // Safety: `&mut self` means no other alias of this cell can exist.
            unsafe { &mut *self.inner.get() }
        }
    }
}
