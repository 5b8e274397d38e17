//! A write-preferring reader/writer lock.
//!
//! Adapted from the same design Go's `sync.RWMutex` uses: readers take a
//! single atomic fetch-add on the uncontended path, and an arriving writer
//! flips the sign of the pending-reader counter so that every reader after
//! it takes the slow path, guaranteeing the writer is never starved by a
//! continuous stream of new readers.

use crate::sync::event::Event;
use crate::util::loom::sync::atomic::{AtomicIsize, Ordering};
use crate::util::loom::sync::Mutex;
use crate::util::lock;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

/// The maximum number of concurrent readers this lock can support.
const MAX_READERS: isize = 1 << 30;

/// A write-preferring reader/writer lock around a `T`.
pub struct RwLock<T: ?Sized> {
    n_pending: AtomicIsize,
    readers_departing: AtomicIsize,
    // Serializes writers; acquiring this is the first step of `lock_write`.
    writer_mutex: Mutex<()>,
    reader_release: Event,
    writer_release: Event,
    value: UnsafeCell<T>,
}

// Same bound as std::sync::RwLock: T must be Send for the lock to be Send,
// and Send + Sync for it to be Sync (a `&RwLock<T>` can hand out `&T` to any
// thread holding a read guard).
unsafe impl<T: ?Sized + Send> Send for RwLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    /// Wraps `value` in a new, unlocked lock.
    pub fn new(value: T) -> Self {
        Self {
            n_pending: AtomicIsize::new(0),
            readers_departing: AtomicIsize::new(0),
            writer_mutex: Mutex::new(()),
            reader_release: Event::new(),
            writer_release: Event::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Consumes the lock, returning the wrapped value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Returns a mutable reference to the inner value, bypassing the lock
    /// entirely. Sound because `&mut self` already statically guarantees no
    /// other reference to this lock exists.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Acquires this lock with shared read access.
    pub fn read(&self) -> ReadGuard<'_, T> {
        // Fast path: if no writer is pending, this is the only atomic op.
        if self.n_pending.fetch_add(1, Ordering::SeqCst) < 0 {
            self.reader_release.wait();
        }
        ReadGuard { lock: self }
    }

    fn unlock_read(&self) {
        if self.n_pending.fetch_sub(1, Ordering::SeqCst) < 0 {
            // A writer is waiting for readers to drain. If we're the last
            // one it's waiting for, wake it.
            if self.readers_departing.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.writer_release.post();
            }
        }
    }

    /// Acquires this lock with exclusive write access.
    pub fn write(&self) -> WriteGuard<'_, T> {
        let guard = lock(&self.writer_mutex);

        // Tell readers a writer is pending (n_pending goes negative), and
        // recover how many readers were active when we did so.
        let r = self.n_pending.fetch_sub(MAX_READERS, Ordering::SeqCst) + MAX_READERS;

        if r != 0 && self.readers_departing.fetch_add(r, Ordering::SeqCst) != 0 {
            self.writer_release.wait();
        }

        WriteGuard {
            lock: self,
            _writer_mutex: guard,
        }
    }

    fn unlock_write(&self) {
        self.n_pending.fetch_add(MAX_READERS, Ordering::SeqCst);
        // Broadcast rather than post-one: every reader that arrived while
        // the writer held the lock needs to be released, not just one.
        self.reader_release.broadcast();
        // `writer_mutex` is released when `_writer_mutex` is dropped.
    }
}

/// A held shared (read) lock. Derefs to `&T`.
pub struct ReadGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

impl<T: ?Sized> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T: ?Sized> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock_read();
    }
}

/// A held exclusive (write) lock. Derefs to `&T`/`&mut T`.
pub struct WriteGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
    _writer_mutex: crate::util::loom::sync::MutexGuard<'a, ()>,
}

impl<T: ?Sized> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T: ?Sized> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T: ?Sized> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock_write();
    }
}
