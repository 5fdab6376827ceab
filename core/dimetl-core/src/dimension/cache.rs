//! Dimension cache: lookup-attribute tuple → surrogate key.
//!
//! Owned by exactly one dimension table. The eviction policy is fixed at
//! construction from `cachesize`:
//!
//! | cachesize | policy |
//! |-----------|--------|
//! | `0`       | disabled (every lookup goes to the store) |
//! | `-1`      | unbounded |
//! | `n > 0`   | at most `n` entries, least-recently-used evicted |
//!
//! With `cachefullrows` a second map of the same policy keeps the stored row
//! per surrogate key.

use crate::error::{EtlError, EtlResult};
use crate::row::{Row, Value, ValueTuple};
use ahash::AHashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub entries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    Disabled,
    Unbounded,
    Lru(NonZeroUsize),
}

impl Policy {
    fn from_cachesize(cachesize: i64) -> EtlResult<Self> {
        match cachesize {
            0 => Ok(Policy::Disabled),
            -1 => Ok(Policy::Unbounded),
            n if n > 0 => NonZeroUsize::new(n as usize)
                .map(Policy::Lru)
                .ok_or_else(|| EtlError::config("cachesize out of range")),
            n => Err(EtlError::config(format!(
                "cachesize must be -1 (unbounded), 0 (disabled) or positive, got {n}"
            ))),
        }
    }
}

enum Slots<K: Hash + Eq, V> {
    Disabled,
    Unbounded(AHashMap<K, V>),
    Lru(LruCache<K, V>),
}

impl<K: Hash + Eq, V: Clone> Slots<K, V> {
    fn new(policy: Policy) -> Self {
        match policy {
            Policy::Disabled => Slots::Disabled,
            Policy::Unbounded => Slots::Unbounded(AHashMap::new()),
            Policy::Lru(cap) => Slots::Lru(LruCache::new(cap)),
        }
    }

    fn get<Q>(&mut self, k: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self {
            Slots::Disabled => None,
            Slots::Unbounded(map) => map.get(k).cloned(),
            Slots::Lru(lru) => lru.get(k).cloned(),
        }
    }

    /// Returns `true` when an older entry had to be evicted.
    fn put(&mut self, k: K, v: V) -> bool {
        match self {
            Slots::Disabled => false,
            Slots::Unbounded(map) => {
                map.insert(k, v);
                false
            }
            Slots::Lru(lru) => matches!(lru.push(k, v), Some((old, _)) if lru.peek(&old).is_none()),
        }
    }

    fn remove<Q>(&mut self, k: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self {
            Slots::Disabled => {}
            Slots::Unbounded(map) => {
                map.remove(k);
            }
            Slots::Lru(lru) => {
                lru.pop(k);
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Slots::Disabled => 0,
            Slots::Unbounded(map) => map.len(),
            Slots::Lru(lru) => lru.len(),
        }
    }

    fn clear(&mut self) {
        match self {
            Slots::Disabled => {}
            Slots::Unbounded(map) => map.clear(),
            Slots::Lru(lru) => lru.clear(),
        }
    }
}

/// Write-through cache of one dimension table.
pub struct DimensionCache {
    policy: Policy,
    keys: Mutex<Slots<ValueTuple, Value>>,
    rows: Option<Mutex<Slots<Value, Row>>>,
    /// Set once an entry has been evicted; the cache no longer mirrors the
    /// whole table after that.
    evicted: AtomicBool,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl DimensionCache {
    pub fn new(cachesize: i64, cachefullrows: bool) -> EtlResult<Self> {
        let policy = Policy::from_cachesize(cachesize)?;
        Ok(Self {
            policy,
            keys: Mutex::new(Slots::new(policy)),
            rows: cachefullrows.then(|| Mutex::new(Slots::new(policy))),
            evicted: AtomicBool::new(false),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        })
    }

    /// A cache that never holds anything.
    pub fn disabled() -> Self {
        Self {
            policy: Policy::Disabled,
            keys: Mutex::new(Slots::Disabled),
            rows: None,
            evicted: AtomicBool::new(false),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.policy != Policy::Disabled
    }

    pub fn caches_rows(&self) -> bool {
        self.rows.is_some()
    }

    /// Whether every stored row is known to be cached: true for an enabled
    /// cache that was prefilled and has never evicted.
    pub fn is_complete(&self, prefilled: bool) -> bool {
        prefilled && self.is_enabled() && !self.evicted.load(Ordering::Relaxed)
    }

    /// Surrogate key for a lookup tuple
    pub fn get_key(&self, tuple: &[Value]) -> Option<Value> {
        let found = self.keys.lock().get(tuple);
        let counter = if found.is_some() {
            &self.hit_count
        } else {
            &self.miss_count
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn put_key(&self, tuple: ValueTuple, key: Value) {
        if self.keys.lock().put(tuple, key) {
            self.evicted.store(true, Ordering::Relaxed);
        }
    }

    pub fn remove_key(&self, tuple: &[Value]) {
        self.keys.lock().remove(tuple);
        self.evicted.store(true, Ordering::Relaxed);
    }

    /// Full stored row for a surrogate key (only with `cachefullrows`).
    pub fn get_row(&self, key: &Value) -> Option<Row> {
        self.rows.as_ref().and_then(|rows| rows.lock().get(key))
    }

    pub fn put_row(&self, key: Value, row: Row) {
        if let Some(rows) = &self.rows {
            rows.lock().put(key, row);
        }
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hit_count.load(Ordering::Relaxed);
        let misses = self.miss_count.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
            entries: self.len(),
        }
    }

    /// Drop every entry and reset the counters. Misses are no longer
    /// authoritative afterwards.
    pub fn clear(&self) {
        self.drop_entries();
        self.evicted.store(true, Ordering::Relaxed);
    }

    /// Empty the cache ahead of a full reload from the store.
    pub(crate) fn begin_refill(&self) {
        self.drop_entries();
        self.evicted.store(false, Ordering::Relaxed);
    }

    fn drop_entries(&self) {
        self.keys.lock().clear();
        if let Some(rows) = &self.rows {
            rows.lock().clear();
        }
        self.hit_count.store(0, Ordering::Relaxed);
        self.miss_count.store(0, Ordering::Relaxed);
    }
}
