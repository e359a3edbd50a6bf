//! # LRU Arena
//!
//! An index-based doubly linked list over a `Vec` of slots.
//!
//! Slot 0 is a sentinel: `sentinel.next` is the most recently used entry and
//! `sentinel.prev` the least recently used. Freed slots go on a free list and
//! are reused before the vector grows. Every operation is O(1) apart from
//! iteration.

use std::collections::HashMap;

const SENTINEL: usize = 0;

/// A cached value with its expiry metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<V> {
    /// Entry key.
    pub key: String,
    /// Stored value.
    pub value: V,
    /// Clock time the entry was written.
    pub created_at_ms: u64,
    /// Time to live; `None` or zero never expires.
    pub ttl_ms: Option<u64>,
}

impl<V> CacheEntry<V> {
    /// Returns true once `now` is past the entry's lifetime.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        match self.ttl_ms {
            Some(ttl) if ttl > 0 => now.saturating_sub(self.created_at_ms) > ttl,
            _ => false,
        }
    }
}

#[derive(Debug)]
struct Slot<V> {
    entry: Option<CacheEntry<V>>,
    prev: usize,
    next: usize,
}

/// Fixed-capacity LRU list with a key index.
#[derive(Debug)]
pub struct LruArena<V> {
    slots: Vec<Slot<V>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    capacity: usize,
}

impl<V> LruArena<V> {
    /// Creates an arena holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Slot {
                entry: None,
                prev: SENTINEL,
                next: SENTINEL,
            }],
            free: Vec::new(),
            index: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the arena holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the entry without changing recency.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<&CacheEntry<V>> {
        let idx = *self.index.get(key)?;
        self.slots.get(idx)?.entry.as_ref()
    }

    /// Returns the entry and marks it most recently used.
    pub fn get(&mut self, key: &str) -> Option<&CacheEntry<V>> {
        let idx = *self.index.get(key)?;
        self.unlink(idx);
        self.link_front(idx);
        self.slots.get(idx)?.entry.as_ref()
    }

    /// Inserts or replaces an entry, making it most recently used.
    ///
    /// Returns the least recently used entry if one was evicted to make room.
    pub fn insert(&mut self, entry: CacheEntry<V>) -> Option<CacheEntry<V>> {
        if let Some(&idx) = self.index.get(&entry.key) {
            if let Some(slot) = self.slots.get_mut(idx) {
                slot.entry = Some(entry);
            }
            self.unlink(idx);
            self.link_front(idx);
            return None;
        }

        let evicted = if self.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let key = entry.key.clone();
        let idx = match self.free.pop() {
            Some(idx) => {
                if let Some(slot) = self.slots.get_mut(idx) {
                    slot.entry = Some(entry);
                }
                idx
            }
            None => {
                self.slots.push(Slot {
                    entry: Some(entry),
                    prev: SENTINEL,
                    next: SENTINEL,
                });
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.link_front(idx);
        evicted
    }

    /// Removes an entry by key.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let idx = self.index.remove(key)?;
        self.release(idx)
    }

    /// Removes and returns the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<CacheEntry<V>> {
        let idx = self.slots.get(SENTINEL)?.prev;
        if idx == SENTINEL {
            return None;
        }
        let entry = self.release(idx)?;
        self.index.remove(&entry.key);
        Some(entry)
    }

    /// Removes every entry for which `expired` returns true.
    pub fn remove_where(&mut self, mut expired: impl FnMut(&CacheEntry<V>) -> bool) -> usize {
        let doomed: Vec<String> = self
            .iter()
            .filter(|e| expired(e))
            .map(|e| e.key.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    /// Iterates entries from most to least recently used.
    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry<V>> + '_ {
        let mut cursor = self.slots.get(SENTINEL).map_or(SENTINEL, |s| s.next);
        std::iter::from_fn(move || {
            if cursor == SENTINEL {
                return None;
            }
            let slot = self.slots.get(cursor)?;
            cursor = slot.next;
            slot.entry.as_ref()
        })
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.slots.truncate(1);
        if let Some(sentinel) = self.slots.get_mut(SENTINEL) {
            sentinel.prev = SENTINEL;
            sentinel.next = SENTINEL;
        }
        self.free.clear();
        self.index.clear();
    }

    fn release(&mut self, idx: usize) -> Option<CacheEntry<V>> {
        self.unlink(idx);
        self.free.push(idx);
        self.slots.get_mut(idx)?.entry.take()
    }

    fn unlink(&mut self, idx: usize) {
        let Some((prev, next)) = self.slots.get(idx).map(|s| (s.prev, s.next)) else {
            return;
        };
        if let Some(p) = self.slots.get_mut(prev) {
            p.next = next;
        }
        if let Some(n) = self.slots.get_mut(next) {
            n.prev = prev;
        }
    }

    fn link_front(&mut self, idx: usize) {
        let head = self.slots.get(SENTINEL).map_or(SENTINEL, |s| s.next);
        if let Some(slot) = self.slots.get_mut(idx) {
            slot.prev = SENTINEL;
            slot.next = head;
        }
        if let Some(h) = self.slots.get_mut(head) {
            h.prev = idx;
        }
        if let Some(sentinel) = self.slots.get_mut(SENTINEL) {
            sentinel.next = idx;
        }
    }
}
