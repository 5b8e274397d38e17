//! A doubly-linked list readers traverse lock-free and writers mutate under
//! a single exclusive lock, reclaiming erased nodes only once no reader that
//! could still observe them remains.
//!
//! This is the typed port of `rcu_list.c`. The live chain (`head`/`tail` plus
//! each node's `next`/`prev`) is exactly that file's `list_node_t` graph,
//! updated through the same sequence of sequentially-consistent atomic
//! stores. The reclamation side is its "zombie stack": `read_lock` pushes a
//! fresh record onto a lock-free Treiber stack (a CAS loop on `zombie_head`,
//! ordered newest-at-head), and `read_unlock` walks the chain of older
//! records looking for a run of already-departed readers stretching all the
//! way to the bottom of the stack. Finding one means every reader that could
//! have been active when those records were pushed — including ones that
//! predate any write section in between — has left, so it is safe to run
//! the destructors queued on them and free the records themselves.
//!
//! One correction relative to the source: there, `list_erase` unlinks a node
//! but never hands it to any zombie record, so every erased node leaks.
//! Here, `erase` pushes the unlinked node onto the *current write section's*
//! own zombie record, so it is destroyed the first time some later reader's
//! unlock walk passes over that record and finds it quiescent. `write_lock`
//! and `write_unlock` reuse the exact same zombie-stack machinery as
//! `read_lock`/`read_unlock`, just as `rcu_write_lock` delegates to
//! `rcu_read_lock` in the source — a writer is, from the reclaimer's point
//! of view, a reader that also holds the exclusive structural-mutation lock.

use crate::util::loom::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use crate::util::loom::sync::{Mutex, MutexGuard};
use crate::util::lock;
use std::marker::PhantomData;
use std::ptr;
use std::ptr::NonNull;

struct Node<T> {
    deleted: AtomicBool,
    value: T,
    next: AtomicPtr<Node<T>>,
    prev: AtomicPtr<Node<T>>,
}

struct ZombieNode<T> {
    next: AtomicPtr<ZombieNode<T>>,
    active: AtomicBool,
    dead: Mutex<Vec<Box<Node<T>>>>,
}

impl<T> ZombieNode<T> {
    fn new() -> *mut ZombieNode<T> {
        Box::into_raw(Box::new(ZombieNode {
            next: AtomicPtr::new(ptr::null_mut()),
            active: AtomicBool::new(true),
            dead: Mutex::new(Vec::new()),
        }))
    }
}

/// A concurrent doubly-linked list with RCU-style read/write separation: any
/// number of readers may traverse concurrently with a single writer, and a
/// node removed by the writer is only freed once no reader that might have
/// observed it remains.
pub struct RcuList<T> {
    write_lock: Mutex<()>,
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    zombie_head: AtomicPtr<ZombieNode<T>>,
}

unsafe impl<T: Send> Send for RcuList<T> {}
// Any number of readers may concurrently hold a `Handle::get() -> &T` to the
// same node, so `Sync` requires `T: Sync` too, not just `T: Send`.
unsafe impl<T: Send + Sync> Sync for RcuList<T> {}

impl<T> RcuList<T> {
    /// Constructs an empty list.
    pub fn new() -> Self {
        Self {
            write_lock: Mutex::new(()),
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
            zombie_head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Issues a token that can be used to open read-side critical sections.
    /// Cheap and reusable: the actual zombie-stack bookkeeping happens in
    /// [`ReaderToken::read_lock`], once per critical section.
    pub fn register_reader(&self) -> ReaderToken<'_, T> {
        ReaderToken { list: self }
    }

    /// Issues a token that can be used to open write-side critical sections.
    /// Only one write critical section may be open at a time; the second
    /// caller to call [`WriterToken::write_lock`] blocks until the first's
    /// guard is dropped.
    pub fn register_writer(&self) -> WriterToken<'_, T> {
        WriterToken { list: self }
    }

    fn push_zombie(&self) -> NonNull<ZombieNode<T>> {
        let z = ZombieNode::<T>::new();
        let mut old_head = self.zombie_head.load(Ordering::SeqCst);
        loop {
            unsafe { (*z).next.store(old_head, Ordering::SeqCst) };
            match self.zombie_head.compare_exchange_weak(
                old_head,
                z,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(current) => old_head = current,
            }
        }
        // Safety: `z` was just allocated via `Box::into_raw` above.
        unsafe { NonNull::new_unchecked(z) }
    }

    /// Walks the chain of zombie records older than `z`; if every one of
    /// them (all the way to the bottom of the stack) has already departed,
    /// this caller was the last reader that could have observed any of
    /// them, so it drains and drops their dead-node lists and frees the
    /// records. Finally marks `z` itself departed.
    fn pop_zombie(&self, z: NonNull<ZombieNode<T>>) {
        let z_ref = unsafe { z.as_ref() };
        let cached_next = z_ref.next.load(Ordering::SeqCst);

        let mut last = true;
        let mut cursor = cached_next;
        while let Some(node) = NonNull::new(cursor) {
            let node_ref = unsafe { node.as_ref() };
            if node_ref.active.load(Ordering::SeqCst) {
                last = false;
                break;
            }
            cursor = node_ref.next.load(Ordering::SeqCst);
        }

        if last {
            let mut cursor = cached_next;
            while let Some(node) = NonNull::new(cursor) {
                let node_ref = unsafe { node.as_ref() };
                // Dropping the boxed nodes runs `T`'s destructor; no reader
                // can still be referencing them once we get here.
                lock(&node_ref.dead).clear();
                cursor = node_ref.next.load(Ordering::SeqCst);
                // Safety: `node` was allocated by `push_zombie` and every
                // live reference to it (via some newer record's `next`) is
                // about to be overwritten below, since we only reach here
                // from the single walk that owns this suffix of the stack.
                drop(unsafe { Box::from_raw(node.as_ptr()) });
            }
            z_ref.next.store(cursor, Ordering::SeqCst);
        }

        z_ref.active.store(false, Ordering::SeqCst);
    }

    fn alloc_node(value: T) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            deleted: AtomicBool::new(false),
            value,
            next: AtomicPtr::new(ptr::null_mut()),
            prev: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    fn traverse_find<'s, F>(&'s self, mut pred: F) -> Option<Handle<'s, T>>
    where
        F: FnMut(&T) -> bool,
    {
        let mut cursor = self.head.load(Ordering::SeqCst);
        while let Some(node) = NonNull::new(cursor) {
            if pred(&unsafe { node.as_ref() }.value) {
                return Some(Handle {
                    node,
                    _marker: PhantomData,
                });
            }
            cursor = unsafe { node.as_ref() }.next.load(Ordering::SeqCst);
        }
        None
    }

    fn traverse_begin<'s>(&'s self) -> Option<Handle<'s, T>> {
        NonNull::new(self.head.load(Ordering::SeqCst)).map(|node| Handle {
            node,
            _marker: PhantomData,
        })
    }
}

impl<T> Default for RcuList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for RcuList<T> {
    fn drop(&mut self) {
        let mut cursor = *self.head.get_mut();
        while let Some(node) = NonNull::new(cursor) {
            let boxed = unsafe { Box::from_raw(node.as_ptr()) };
            cursor = boxed.next.load(Ordering::SeqCst);
        }

        let mut zombie = *self.zombie_head.get_mut();
        while let Some(node) = NonNull::new(zombie) {
            let boxed = unsafe { Box::from_raw(node.as_ptr()) };
            zombie = boxed.next.load(Ordering::SeqCst);
        }
    }
}

/// A handle to an entry discovered during a read or write critical section.
/// Borrowed from the guard that produced it, so it cannot outlive the
/// critical section whose RCU protection makes dereferencing it sound.
pub struct Handle<'g, T> {
    node: NonNull<Node<T>>,
    _marker: PhantomData<&'g ()>,
}

impl<T> Clone for Handle<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<'_, T> {}

impl<'g, T> Handle<'g, T> {
    /// The entry's value.
    pub fn get(&self) -> &'g T {
        // Safety: the node is reachable from a traversal rooted at the
        // list's head, and a node already erased during this critical
        // section remains allocated until this guard (and every guard that
        // could race it) departs.
        unsafe { &self.node.as_ref().value }
    }

    /// The next live entry, or `None` if this was the tail.
    pub fn next(&self) -> Option<Handle<'g, T>> {
        let next = unsafe { self.node.as_ref() }.next.load(Ordering::SeqCst);
        NonNull::new(next).map(|node| Handle {
            node,
            _marker: PhantomData,
        })
    }
}

/// Reusable capability to open read-side critical sections on an [`RcuList`].
pub struct ReaderToken<'a, T> {
    list: &'a RcuList<T>,
}

impl<'a, T> ReaderToken<'a, T> {
    /// Opens a read-side critical section. Traversal through the returned
    /// guard is lock-free and runs concurrently with any number of other
    /// readers and with at most one writer.
    pub fn read_lock(&self) -> ReadGuard<'a, T> {
        let zombie = self.list.push_zombie();
        ReadGuard {
            list: self.list,
            zombie,
        }
    }
}

/// An open read-side critical section. Dropping it is what may allow nodes
/// erased by some writer to finally be reclaimed.
pub struct ReadGuard<'a, T> {
    list: &'a RcuList<T>,
    zombie: NonNull<ZombieNode<T>>,
}

impl<'a, T> ReadGuard<'a, T> {
    /// Borrowed from `&self` rather than from the list's own lifetime: a
    /// [`Handle`] obtained here cannot outlive this guard, so it is never
    /// possible to hold one across the point where dropping the guard could
    /// let the reclaimer free the node it points at.
    /// The first live entry, or `None` if the list is empty.
    pub fn begin(&self) -> Option<Handle<'_, T>> {
        self.list.traverse_begin()
    }

    /// Always `None`; provided for symmetry with `begin` when walking to a
    /// known end sentinel is more convenient than matching on `Option`.
    pub fn end(&self) -> Option<Handle<'_, T>> {
        None
    }

    /// The first live entry satisfying `pred`, found by a forward scan from
    /// the head.
    pub fn find<F>(&self, mut pred: F) -> Option<Handle<'_, T>>
    where
        F: FnMut(&T) -> bool,
    {
        self.list.traverse_find(&mut pred)
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.list.pop_zombie(self.zombie);
    }
}

/// Reusable capability to open write-side critical sections on an
/// [`RcuList`]. Only one write critical section is open at a time.
pub struct WriterToken<'a, T> {
    list: &'a RcuList<T>,
}

impl<'a, T> WriterToken<'a, T> {
    /// Opens a write-side critical section, blocking until any other
    /// writer's section has ended. The returned guard is simultaneously
    /// this writer's own RCU read participation: it is what lets `erase`
    /// defer destruction of the node it unlinks until no concurrent reader
    /// can still observe it.
    pub fn write_lock(&self) -> WriteGuard<'a, T> {
        let write_mutex = lock_owned(&self.list.write_lock);
        let zombie = self.list.push_zombie();
        WriteGuard {
            list: self.list,
            _write_mutex: write_mutex,
            zombie,
        }
    }
}

fn lock_owned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    if cfg!(debug_assertions) {
        mutex.lock().expect("rcu list write lock should never be poisoned")
    } else {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An open write-side critical section.
pub struct WriteGuard<'a, T> {
    list: &'a RcuList<T>,
    _write_mutex: MutexGuard<'a, ()>,
    zombie: NonNull<ZombieNode<T>>,
}

impl<'a, T> WriteGuard<'a, T> {
    /// Inserts `value` at the head of the list.
    pub fn push_front(&mut self, value: T) -> Handle<'a, T> {
        let node = NonNull::new(RcuList::<T>::alloc_node(value)).expect("allocation never null");
        let old_head = self.list.head.load(Ordering::SeqCst);

        if let Some(mut old_head) = NonNull::new(old_head) {
            unsafe { node.as_ref() }.next.store(old_head.as_ptr(), Ordering::SeqCst);
            unsafe { old_head.as_mut() }.prev.store(node.as_ptr(), Ordering::SeqCst);
            self.list.head.store(node.as_ptr(), Ordering::SeqCst);
        } else {
            self.list.head.store(node.as_ptr(), Ordering::SeqCst);
            self.list.tail.store(node.as_ptr(), Ordering::SeqCst);
        }

        Handle {
            node,
            _marker: PhantomData,
        }
    }

    /// Inserts `value` at the tail of the list.
    pub fn push_back(&mut self, value: T) -> Handle<'a, T> {
        let node = NonNull::new(RcuList::<T>::alloc_node(value)).expect("allocation never null");
        let old_tail = self.list.tail.load(Ordering::SeqCst);

        if let Some(mut old_tail) = NonNull::new(old_tail) {
            unsafe { node.as_ref() }.prev.store(old_tail.as_ptr(), Ordering::SeqCst);
            unsafe { old_tail.as_mut() }.next.store(node.as_ptr(), Ordering::SeqCst);
            self.list.tail.store(node.as_ptr(), Ordering::SeqCst);
        } else {
            self.list.head.store(node.as_ptr(), Ordering::SeqCst);
            self.list.tail.store(node.as_ptr(), Ordering::SeqCst);
        }

        Handle {
            node,
            _marker: PhantomData,
        }
    }

    /// Unlinks the entry `handle` refers to. A no-op if it was already
    /// erased (by this or an earlier call) during this critical section.
    /// Destruction of the value is deferred until no reader that could
    /// still observe it remains; see the module documentation.
    pub fn erase<'h>(&mut self, handle: Handle<'h, T>) {
        let node = handle.node;
        let node_ref = unsafe { node.as_ref() };

        if node_ref.deleted.swap(true, Ordering::SeqCst) {
            return;
        }

        let prev = node_ref.prev.load(Ordering::SeqCst);
        let next = node_ref.next.load(Ordering::SeqCst);

        match NonNull::new(prev) {
            Some(mut prev) => unsafe { prev.as_mut() }.next.store(next, Ordering::SeqCst),
            None => self.list.head.store(next, Ordering::SeqCst),
        }
        match NonNull::new(next) {
            Some(mut next) => unsafe { next.as_mut() }.prev.store(prev, Ordering::SeqCst),
            None => self.list.tail.store(prev, Ordering::SeqCst),
        }

        let boxed = unsafe { Box::from_raw(node.as_ptr()) };
        lock(&unsafe { self.zombie.as_ref() }.dead).push(boxed);
    }

    /// The first live entry, or `None` if the list is empty.
    pub fn begin(&self) -> Option<Handle<'_, T>> {
        self.list.traverse_begin()
    }

    /// Always `None`; see [`ReadGuard::end`].
    pub fn end(&self) -> Option<Handle<'_, T>> {
        None
    }

    /// The first live entry satisfying `pred`, found by a forward scan from
    /// the head.
    pub fn find<F>(&self, mut pred: F) -> Option<Handle<'_, T>>
    where
        F: FnMut(&T) -> bool,
    {
        self.list.traverse_find(&mut pred)
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.list.pop_zombie(self.zombie);
    }
}
