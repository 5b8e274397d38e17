//! A per-bucket-locked concurrent map using separate chaining.
//!
//! Typed port of `hashmap/hashmap.c` and its `hashmap_attr_t`. The C version
//! takes an opaque key/value pointer pair plus `equals`/`keylen`/`delete_key`/
//! `delete_value` callbacks; those collapse to ordinary `K: Hash + Eq` and
//! `Drop` bounds on a generic key/value pair, since that is exactly what the
//! callbacks existed to emulate for an opaque handle. `key_is_literal`
//! likewise disappears: hashing a Rust `K` through its own `Hash` impl is the
//! `key_is_literal = true` path generalized to any hashable type rather than
//! just a pointer's raw bits.
//!
//! Each bucket is one of the crate's own [`intrusive::List`](crate::intrusive::List)s
//! — the same structure the RCU engine threads its generation roster
//! through — guarded by its own [`RwLock`](crate::sync::rwlock::RwLock). A
//! top-level lock over the bucket array's shape is held shared by every
//! operation and exclusive only during resize, exactly mirroring the flat
//! map's top-level/per-page split.
//!
//! One correction relative to the source: `hashmap.c` increments `n_items`
//! on every successful insert, including an overwrite of an existing key.
//! This implementation only increments on a genuine new insertion, so `len()`
//! reflects the number of distinct keys rather than the number of inserts.

use crate::intrusive::List;
use crate::sync::rwlock::RwLock;
use crate::util::loom::sync::atomic::{AtomicUsize, Ordering};
use std::collections::hash_map::RandomState;
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{BuildHasher, Hash, Hasher};

const INITIAL_BUCKET_COUNT: usize = 4;
const DEFAULT_LOAD_FACTOR: f64 = 0.75;

/// Error returned when constructing a [`ChainMap`] with an invalid load
/// factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidLoadFactor;

impl Display for InvalidLoadFactor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("load_factor must be in (0, 1]")
    }
}

impl std::error::Error for InvalidLoadFactor {}

/// Builder for a [`ChainMap`], mirroring `hashmap_attr_t`. Only the
/// load factor and hasher remain configurable; the equality/key-length/
/// deleter callbacks the C attributes record carried are now just `K`'s own
/// `Hash`/`Eq`/`Drop` impls.
#[derive(Clone, Copy)]
pub struct Builder<S = RandomState> {
    load_factor: f64,
    hash_builder: S,
}

impl Builder<RandomState> {
    /// A builder with the default load factor and a randomized hasher.
    pub fn new() -> Self {
        Self {
            load_factor: DEFAULT_LOAD_FACTOR,
            hash_builder: RandomState::new(),
        }
    }
}

impl Default for Builder<RandomState> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Builder<S> {
    /// Replaces the hasher this map will use to place keys into buckets.
    pub fn with_hasher<S2>(self, hash_builder: S2) -> Builder<S2> {
        Builder {
            load_factor: self.load_factor,
            hash_builder,
        }
    }

    /// Sets the fraction of `n_buckets` the item count may reach before a
    /// resize is triggered. Must be in `(0, 1]`.
    pub fn with_load_factor(self, load_factor: f64) -> Self {
        Self {
            load_factor,
            hash_builder: self.hash_builder,
        }
    }

    /// Builds the map, or rejects a load factor outside `(0, 1]`.
    pub fn build<K, V>(self) -> Result<ChainMap<K, V, S>, InvalidLoadFactor>
    where
        S: BuildHasher,
    {
        if !(self.load_factor > 0.0 && self.load_factor <= 1.0) {
            return Err(InvalidLoadFactor);
        }

        Ok(ChainMap {
            load_factor: self.load_factor,
            hash_builder: self.hash_builder,
            buckets: RwLock::new(Shape::new(INITIAL_BUCKET_COUNT)),
            n_items: AtomicUsize::new(0),
        })
    }
}

/// A `Hasher`/[`BuildHasher`] pair that treats a `u64` key's own bit pattern
/// as its hash, rather than running it through a general-purpose hasher.
/// Mirrors the `key_is_literal` branch of `hashmap_attr.c`, where a key small
/// enough to fit in a pointer is hashed by taking the pointer's raw bits
/// instead of hashing the bytes it points to.
#[derive(Clone, Copy, Debug, Default)]
pub struct LiteralHasher(u64);

impl Hasher for LiteralHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        // Only reached if a key ever hashes itself byte-by-byte instead of
        // through `write_u64`; fold the bytes rather than panic.
        for &b in bytes {
            self.0 = self.0.wrapping_mul(31).wrapping_add(b as u64);
        }
    }

    fn write_u64(&mut self, i: u64) {
        self.0 = i;
    }
}

/// Builds [`LiteralHasher`]s. Pair with [`ChainMap::with_literal_keys`] for
/// `u64`-keyed maps where hashing the key is pure overhead.
#[derive(Clone, Copy, Debug, Default)]
pub struct LiteralBuildHasher;

impl BuildHasher for LiteralBuildHasher {
    type Hasher = LiteralHasher;

    fn build_hasher(&self) -> LiteralHasher {
        LiteralHasher::default()
    }
}

struct Entry<K, V> {
    hash: u32,
    key: K,
    value: V,
}

struct Shape<K, V> {
    buckets: Box<[RwLock<List<Entry<K, V>>>]>,
}

impl<K, V> Shape<K, V> {
    fn new(bucket_count: usize) -> Self {
        Self {
            buckets: (0..bucket_count).map(|_| RwLock::new(List::new())).collect::<Vec<_>>().into_boxed_slice(),
        }
    }
}

/// A concurrent map using per-bucket chaining, generic over key and value
/// type.
pub struct ChainMap<K, V, S = RandomState> {
    load_factor: f64,
    hash_builder: S,
    buckets: RwLock<Shape<K, V>>,
    n_items: AtomicUsize,
}

impl<K, V> ChainMap<K, V, RandomState>
where
    K: Hash + Eq,
{
    /// Constructs a map with the default load factor (0.75) and a
    /// [`RandomState`] hasher, mirroring `hashmap_attr_default`.
    pub fn new() -> Self {
        Builder::new().build().expect("default load factor is always valid")
    }
}

impl<K, V> Default for ChainMap<K, V, RandomState>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ChainMap<u64, V, LiteralBuildHasher> {
    /// Constructs a map that hashes its `u64` keys by their own bit pattern
    /// instead of running them through a general-purpose hasher — the
    /// `key_is_literal` fast path from `hashmap_attr.c`, for callers whose
    /// keys are already well-distributed integers and don't need SipHash's
    /// DoS resistance.
    pub fn with_literal_keys() -> Self {
        Builder::new()
            .with_hasher(LiteralBuildHasher)
            .build()
            .expect("default load factor is always valid")
    }
}

impl<K, V, S> ChainMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn hash_key(&self, key: &K) -> u32 {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }

    fn should_resize(&self, n_buckets: usize, candidate_items: usize) -> bool {
        // Strict greater-than: the source's attribute default and its actual
        // trigger disagree on the boundary case, so this implementation
        // picks one rule and applies it consistently.
        candidate_items as f64 > self.load_factor * n_buckets as f64
    }

    /// The number of entries currently stored.
    pub fn len(&self) -> usize {
        self.n_items.load(Ordering::SeqCst)
    }

    /// Whether the map currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current number of buckets. Exposed for tests that assert a
    /// resize occurred.
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().buckets.len()
    }

    /// Inserts `value` under `key`, returning the previous value if `key`
    /// was already present.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        loop {
            let shape = self.buckets.read();
            let n_buckets = shape.buckets.len();
            if self.should_resize(n_buckets, self.n_items.load(Ordering::SeqCst) + 1) {
                drop(shape);
                self.resize();
                continue;
            }

            let hash = self.hash_key(&key);
            let idx = hash as usize & (n_buckets - 1);
            let mut bucket = shape.buckets[idx].write();

            if let Some(handle) = bucket.find(|entry| entry.hash == hash && entry.key == key) {
                let old = std::mem::replace(&mut bucket.get_mut(handle).value, value);
                return Some(old);
            }

            bucket.push_front(Entry { hash, key, value });
            drop(bucket);
            drop(shape);
            self.n_items.fetch_add(1, Ordering::SeqCst);
            return None;
        }
    }

    /// Removes `key`, returning its value if it was present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let shape = self.buckets.read();
        let n_buckets = shape.buckets.len();
        let hash = self.hash_key(key);
        let idx = hash as usize & (n_buckets - 1);
        let mut bucket = shape.buckets[idx].write();

        let handle = bucket.find(|entry| entry.hash == hash && &entry.key == key)?;
        let entry = bucket.remove(handle);
        drop(bucket);
        drop(shape);
        self.n_items.fetch_sub(1, Ordering::SeqCst);
        Some(entry.value)
    }

    /// Returns a clone of the value stored under `key`, if present.
    pub fn find(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.with_value(key, V::clone)
    }

    /// Runs `f` on a reference to the value stored under `key`, without
    /// cloning.
    pub fn with_value<F, R>(&self, key: &K, f: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        let shape = self.buckets.read();
        let n_buckets = shape.buckets.len();
        let hash = self.hash_key(key);
        let idx = hash as usize & (n_buckets - 1);
        let bucket = shape.buckets[idx].read();

        let handle = bucket.find(|entry| entry.hash == hash && &entry.key == key)?;
        Some(f(&bucket.get(handle).value))
    }

    /// Whether `key` is currently present in the map.
    pub fn contains(&self, key: &K) -> bool {
        self.with_value(key, |_| ()).is_some()
    }

    /// Doubles the bucket count and rehashes every entry using its
    /// memoized hash, so resize touches no key or value, only pointers.
    fn resize(&self) {
        let mut shape = self.buckets.write();
        let n_buckets = shape.buckets.len();

        if !self.should_resize(n_buckets, self.n_items.load(Ordering::SeqCst) + 1) {
            return;
        }

        let new_count = n_buckets * 2;
        let mut new_buckets: Vec<List<Entry<K, V>>> = (0..new_count).map(|_| List::new()).collect();

        for bucket in shape.buckets.iter_mut() {
            let bucket = bucket.get_mut();
            while let Some(entry) = bucket.pop_front() {
                let idx = entry.hash as usize & (new_count - 1);
                new_buckets[idx].push_front(entry);
            }
        }

        shape.buckets = new_buckets.into_iter().map(RwLock::new).collect::<Vec<_>>().into_boxed_slice();
    }
}
