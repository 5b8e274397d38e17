//! A page-partitioned, open-addressed concurrent map keyed by `u64`.
//!
//! Typed port of `flat-map/flat_map.c`. The backing array is logically cut
//! into fixed-size *pages*, each behind its own [`RwLock`](crate::sync::rwlock::RwLock);
//! a top-level lock guards only the table's *shape* (the page array itself),
//! held shared by every lookup/insert/remove and exclusive only while a
//! resize swaps in a bigger array. Disjoint pages can therefore be mutated by
//! different threads fully in parallel, and a probe that walks off the end of
//! one page releases that page's lock before taking the next page's lock in
//! the same mode, exactly as the source does across its `page_lock_t` array.
//!
//! Where the source stores an opaque `(key_t, void*)` slot, a cell here
//! stores an `Option<V>` directly: dropping a cell's value (on remove,
//! overwrite, or map teardown) is just Rust's ordinary `Drop`, the typed
//! replacement for the source's `deleter_f` callback.

use crate::hash::hash_u64;
use crate::sync::rwlock::RwLock;
use crate::util::loom::sync::atomic::{AtomicUsize, Ordering};
use std::fmt::{self, Debug, Display, Formatter};

/// Sentinel marking an empty cell; reserved, so `0` may never be inserted as
/// a key.
const EMPTY: u64 = 0;
/// Sentinel marking a tombstone (a formerly-occupied cell left behind by a
/// `remove`); reserved, so `u64::MAX` may never be inserted as a key.
const TOMBSTONE: u64 = u64::MAX;

const INITIAL_CAPACITY: usize = 16;
const LOAD_FACTOR: f64 = 0.75;

/// Error returned when constructing a [`FlatMap`] with invalid parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// `page_size` was zero or not a power of two.
    InvalidPageSize,
}

impl Display for BuildError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPageSize => f.write_str("page_size must be a non-zero power of two"),
        }
    }
}

impl std::error::Error for BuildError {}

/// Error returned by [`FlatMap::insert`] and [`FlatMap::remove`] for an
/// invalid key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidKey;

impl Display for InvalidKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("key 0 and key u64::MAX are reserved sentinels and cannot be stored")
    }
}

impl std::error::Error for InvalidKey {}

struct Cell<V> {
    key: u64,
    value: Option<V>,
}

impl<V> Cell<V> {
    const fn empty() -> Self {
        Self {
            key: EMPTY,
            value: None,
        }
    }
}

struct Shape<V> {
    pages: Box<[RwLock<Box<[Cell<V>]>>]>,
    capacity: usize,
}

impl<V> Shape<V> {
    fn new(capacity: usize, page_size: usize) -> Self {
        let page_count = (capacity / page_size).max(1);
        let pages = (0..page_count)
            .map(|_| RwLock::new((0..page_size).map(|_| Cell::empty()).collect::<Vec<_>>().into_boxed_slice()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { pages, capacity }
    }
}

/// A page-partitioned open-addressed concurrent map from `u64` to `V`.
///
/// Cloning or moving a key into the map transfers ownership to it; `remove`
/// and overwriting `insert` hand ownership back to the caller rather than
/// running a deleter callback.
pub struct FlatMap<V> {
    page_size: usize,
    shape: RwLock<Shape<V>>,
    occupied_cells: AtomicUsize,
}

#[cold]
fn probe_exhausted() -> ! {
    debug_assert!(
        false,
        "flat map probe wrapped without finding a slot; this means resize's 0.75 load \
         factor invariant was violated"
    );
    std::process::abort();
}

impl<V> FlatMap<V> {
    /// Constructs a new map with the given page size, which must be a
    /// non-zero power of two. The initial capacity is `page_size.max(16)`,
    /// ensuring at least one full page exists even for a page size larger
    /// than the source's hardcoded initial capacity of 16.
    pub fn new(page_size: usize) -> Result<Self, BuildError> {
        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(BuildError::InvalidPageSize);
        }

        let capacity = INITIAL_CAPACITY.max(page_size);
        Ok(Self {
            page_size,
            shape: RwLock::new(Shape::new(capacity, page_size)),
            occupied_cells: AtomicUsize::new(0),
        })
    }

    /// The number of occupied-or-tombstoned cells. Only reset to the live
    /// count on resize, so this may overcount live entries between resizes.
    pub fn occupied_cells(&self) -> usize {
        self.occupied_cells.load(Ordering::SeqCst)
    }

    fn load_factor_exceeded(&self, capacity: usize) -> bool {
        let occupied = self.occupied_cells.load(Ordering::SeqCst);
        (occupied + 1) as f64 / capacity as f64 >= LOAD_FACTOR
    }

    /// Inserts `value` under `key`. If `key` was already present, its old
    /// value is replaced and returned; otherwise `None` is returned and the
    /// map's occupancy grows by one. Fails only for the reserved sentinel
    /// keys.
    pub fn insert(&self, key: u64, value: V) -> Result<Option<V>, InvalidKey> {
        if key == EMPTY || key == TOMBSTONE {
            return Err(InvalidKey);
        }

        loop {
            let shape = self.shape.read();
            if self.load_factor_exceeded(shape.capacity) {
                drop(shape);
                self.resize();
                continue;
            }

            let capacity = shape.capacity;
            let start = hash_u64(key, 0) as usize & (capacity - 1);

            let mut page_idx = start / self.page_size;
            let mut page = shape.pages[page_idx].write();
            let mut idx = start;

            for _ in 0..capacity {
                let this_page = idx / self.page_size;
                if this_page != page_idx {
                    drop(page);
                    page_idx = this_page;
                    page = shape.pages[page_idx].write();
                }

                let offset = idx % self.page_size;
                let cell = &mut page[offset];

                if cell.key == EMPTY {
                    cell.key = key;
                    cell.value = Some(value);
                    drop(page);
                    drop(shape);
                    self.occupied_cells.fetch_add(1, Ordering::SeqCst);
                    return Ok(None);
                }

                if cell.key == key {
                    let old = cell.value.replace(value);
                    return Ok(old);
                }

                // Tombstones are skipped, never treated as an insertion
                // point: duplicates cannot arise because linear probing
                // always reaches either the live key or an empty cell
                // first.
                idx = (idx + 1) & (capacity - 1);
            }

            probe_exhausted();
        }
    }

    /// Removes `key` from the map, returning its value if present.
    pub fn remove(&self, key: u64) -> Option<V> {
        if key == EMPTY || key == TOMBSTONE {
            return None;
        }

        let shape = self.shape.read();
        let capacity = shape.capacity;
        let start = hash_u64(key, 0) as usize & (capacity - 1);

        let mut page_idx = start / self.page_size;
        let mut page = shape.pages[page_idx].write();
        let mut idx = start;

        for _ in 0..capacity {
            let this_page = idx / self.page_size;
            if this_page != page_idx {
                drop(page);
                page_idx = this_page;
                page = shape.pages[page_idx].write();
            }

            let offset = idx % self.page_size;
            let cell = &mut page[offset];

            if cell.key == EMPTY {
                return None;
            }

            if cell.key == key {
                let value = cell.value.take();
                cell.key = TOMBSTONE;
                // `occupied_cells` is intentionally left untouched: the
                // tombstone still occupies a probe slot until the next
                // resize recounts live cells.
                return value;
            }

            idx = (idx + 1) & (capacity - 1);
        }

        None
    }

    /// Returns a clone of the value stored under `key`, if present.
    pub fn find(&self, key: u64) -> Option<V>
    where
        V: Clone,
    {
        self.with_value(key, V::clone)
    }

    /// Runs `f` on a reference to the value stored under `key` and returns
    /// its result, without cloning. Useful for types that aren't `Clone`.
    pub fn with_value<F, R>(&self, key: u64, f: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        if key == EMPTY || key == TOMBSTONE {
            return None;
        }

        let shape = self.shape.read();
        let capacity = shape.capacity;
        let start = hash_u64(key, 0) as usize & (capacity - 1);

        let mut page_idx = start / self.page_size;
        let mut page = shape.pages[page_idx].read();
        let mut idx = start;

        for _ in 0..capacity {
            let this_page = idx / self.page_size;
            if this_page != page_idx {
                drop(page);
                page_idx = this_page;
                page = shape.pages[page_idx].read();
            }

            let offset = idx % self.page_size;
            let cell = &page[offset];

            if cell.key == EMPTY {
                return None;
            }

            if cell.key == key {
                return cell.value.as_ref().map(f);
            }

            idx = (idx + 1) & (capacity - 1);
        }

        None
    }

    /// Returns `true` if `key` is present in the map.
    pub fn contains(&self, key: u64) -> bool {
        self.with_value(key, |_| ()).is_some()
    }

    /// Doubles the backing array's capacity (and the page-lock array's page
    /// count) and re-inserts every live cell with no per-cell locking, since
    /// the exclusive shape lock already excludes every other operation.
    fn resize(&self) {
        let mut shape = self.shape.write();

        // Another thread may have already resized between us releasing the
        // shared lock and acquiring the exclusive one; re-check and bail.
        if !self.load_factor_exceeded(shape.capacity) {
            return;
        }

        let new_capacity = shape.capacity * 2;
        let mut new_pages: Vec<Box<[Cell<V>]>> = (0..(new_capacity / self.page_size).max(1))
            .map(|_| (0..self.page_size).map(|_| Cell::empty()).collect::<Vec<_>>().into_boxed_slice())
            .collect();

        let mut live = 0usize;
        for page in shape.pages.iter_mut() {
            for cell in page.get_mut().iter_mut() {
                if cell.key == EMPTY || cell.key == TOMBSTONE {
                    continue;
                }

                let key = cell.key;
                let value = cell.value.take().expect("occupied cell always carries a value");
                insert_unlocked(&mut new_pages, new_capacity, self.page_size, key, value);
                live += 1;
            }
        }

        shape.pages = new_pages.into_boxed_slice();
        shape.capacity = new_capacity;
        self.occupied_cells.store(live, Ordering::SeqCst);
    }
}

/// Re-inserts `key`/`value` into a freshly allocated (therefore all-empty)
/// set of pages. Used only by `resize`, which already holds the shape's
/// exclusive lock, so no page locking is needed here.
fn insert_unlocked<V>(pages: &mut [Box<[Cell<V>]>], capacity: usize, page_size: usize, key: u64, value: V) {
    let start = hash_u64(key, 0) as usize & (capacity - 1);
    let mut idx = start;
    for _ in 0..capacity {
        let cell = &mut pages[idx / page_size][idx % page_size];
        if cell.key == EMPTY {
            cell.key = key;
            cell.value = Some(value);
            return;
        }
        idx = (idx + 1) & (capacity - 1);
    }
    probe_exhausted();
}
