//! Bounded LRU cache with byte accounting.
//!
//! The cache maps string keys to payloads, charging each entry its reported
//! payload size plus an optional fixed per-entry overhead (zero unless
//! configured). When the resident total exceeds the budget, entries are
//! evicted least-recently-used first — with one exemption: the cache never
//! evicts its sole remaining entry, so the item just inserted by a `put`
//! always stays resident.
//!
//! Recency is tracked with a doubly-linked list of arena slot indices
//! (a `Vec` plus free list) rather than pointer-linked nodes, keeping
//! promotion and eviction O(1) without manual pointer bookkeeping.
//!
//! # Promotion policy
//!
//! `get` is read-only and does **not** promote an entry; recency is updated
//! only on `put`. Re-putting an existing key fully releases the old entry
//! (size accounted) before re-inserting at the most-recently-used end.
//!
//! # Thread safety
//!
//! One mutex guards the map and the recency list. The cache is shared
//! across potentially many lifecycle managers; contention is low because
//! entries are coarse (decoded tiles), so a single lock is sufficient.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::trace;

/// Default accounting overhead charged per resident entry.
///
/// Zero: callers report payload sizes and the budget is spent on payload
/// bytes alone. Hosts that want the slot, key storage, and map bookkeeping
/// accounted can pass a non-zero overhead to
/// [`BoundedResourceCache::with_entry_overhead`].
pub const DEFAULT_ENTRY_OVERHEAD_BYTES: u64 = 0;

/// Sentinel for "no slot" in the recency list links.
const NIL: usize = usize::MAX;

/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub resident_bytes: u64,
    pub entry_count: usize,
}

struct Slot<V> {
    key: String,
    payload: V,
    /// Charged size: caller-reported payload size plus the configured
    /// per-entry overhead.
    charge: u64,
    prev: usize,
    next: usize,
}

struct Inner<V> {
    slots: Vec<Option<Slot<V>>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    /// Least-recently-used end of the recency list.
    lru: usize,
    /// Most-recently-used end of the recency list.
    mru: usize,
    resident: u64,
}

impl<V> Inner<V> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            lru: NIL,
            mru: NIL,
            resident: 0,
        }
    }

    /// Detaches the slot at `idx` from the recency list.
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slots[idx].as_ref().expect("unlink of vacant slot");
            (slot.prev, slot.next)
        };
        if prev != NIL {
            self.slots[prev].as_mut().expect("corrupt list").next = next;
        } else {
            self.lru = next;
        }
        if next != NIL {
            self.slots[next].as_mut().expect("corrupt list").prev = prev;
        } else {
            self.mru = prev;
        }
    }

    /// Links the slot at `idx` at the most-recently-used end.
    fn link_mru(&mut self, idx: usize) {
        let old_mru = self.mru;
        {
            let slot = self.slots[idx].as_mut().expect("link of vacant slot");
            slot.prev = old_mru;
            slot.next = NIL;
        }
        if old_mru != NIL {
            self.slots[old_mru].as_mut().expect("corrupt list").next = idx;
        } else {
            self.lru = idx;
        }
        self.mru = idx;
    }

    /// Removes the entry at `idx` entirely, returning its payload.
    fn take(&mut self, idx: usize) -> (String, V, u64) {
        self.unlink(idx);
        let slot = self.slots[idx].take().expect("take of vacant slot");
        self.index.remove(&slot.key);
        self.free.push(idx);
        self.resident = self
            .resident
            .checked_sub(slot.charge)
            .unwrap_or_else(|| panic!("cache byte accounting underflow releasing {:?}", slot.key));
        (slot.key, slot.payload, slot.charge)
    }

    fn insert_mru(&mut self, key: String, payload: V, charge: u64) {
        let slot = Slot {
            key: key.clone(),
            payload,
            charge,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.link_mru(idx);
        self.resident = self
            .resident
            .checked_add(charge)
            .unwrap_or_else(|| panic!("cache byte accounting overflow inserting entry"));
    }

    fn entry_count(&self) -> usize {
        self.index.len()
    }
}

/// Byte-budgeted LRU cache keyed by resource identity.
///
/// Payloads must be `Clone`; `get` hands back a clone so callers are
/// expected to store cheaply-clonable values (typically `Arc`-wrapped
/// decoded data).
pub struct BoundedResourceCache<V> {
    inner: Mutex<Inner<V>>,
    max_bytes: u64,
    entry_overhead: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> BoundedResourceCache<V> {
    /// Creates a cache with the given byte budget and no per-entry
    /// overhead charge.
    pub fn new(max_bytes: u64) -> Self {
        Self::with_entry_overhead(max_bytes, DEFAULT_ENTRY_OVERHEAD_BYTES)
    }

    /// Creates a cache that charges each entry `entry_overhead` bytes on
    /// top of its reported payload size.
    pub fn with_entry_overhead(max_bytes: u64, entry_overhead: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            max_bytes,
            entry_overhead,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Looks up a payload by key.
    ///
    /// Read-only: does not alter LRU order.
    pub fn get(&self, key: &str) -> Option<V> {
        let inner = self.inner.lock();
        match inner.index.get(key) {
            Some(&idx) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let slot = inner.slots[idx].as_ref().expect("index points at vacant slot");
                Some(slot.payload.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts a payload at the most-recently-used end.
    ///
    /// `size_bytes` is the caller-reported resident size of the payload;
    /// each entry is additionally charged the configured per-entry
    /// overhead. If the key is already present the old entry is fully
    /// released first. The eviction loop runs after insertion, so the new
    /// entry may push out older ones — but never itself (sole-entry
    /// exemption).
    pub fn put(&self, key: &str, payload: V, size_bytes: u64) {
        let charge = size_bytes
            .checked_add(self.entry_overhead)
            .unwrap_or_else(|| panic!("cache entry size overflow for {key:?}"));

        let mut inner = self.inner.lock();
        if let Some(&idx) = inner.index.get(key) {
            inner.take(idx);
        }
        inner.insert_mru(key.to_string(), payload, charge);
        self.evict_over_budget(&mut inner);
    }

    /// Removes an entry, returning its payload if present.
    pub fn remove(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let idx = *inner.index.get(key)?;
        let (_, payload, _) = inner.take(idx);
        Some(payload)
    }

    /// Releases every entry and resets the accounted size to zero.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        *inner = Inner::new();
    }

    /// Current number of resident entries.
    pub fn entry_count(&self) -> usize {
        self.inner.lock().entry_count()
    }

    /// Current accounted size in bytes (payload sizes plus overhead).
    pub fn resident_bytes(&self) -> u64 {
        self.inner.lock().resident
    }

    /// The configured byte budget.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Whether the key is resident, without touching hit/miss counters.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().index.contains_key(key)
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            resident_bytes: inner.resident,
            entry_count: inner.entry_count(),
        }
    }

    /// Evicts least-recently-used entries while over budget, keeping at
    /// least one entry resident.
    fn evict_over_budget(&self, inner: &mut Inner<V>) {
        while inner.resident > self.max_bytes && inner.entry_count() > 1 {
            let victim = inner.lru;
            debug_assert_ne!(victim, NIL, "non-empty cache with empty recency list");
            let (key, _, charge) = inner.take(victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, freed = charge, "evicted cache entry");
        }
    }
}
