//! Fixed-capacity LFU cache with a synchronous eviction hook.
//!
//! Eviction is deterministic: the lowest access frequency goes first, and
//! frequency ties break by insertion order (oldest insertion evicted
//! first). Entries start at frequency 1; `get` and re-`insert` each bump
//! the frequency. The pack's cache crates cover LRU and probabilistic
//! TinyLFU, neither of which honors that ordering, so the policy lives
//! here: a key map plus a `(frequency, insertion-sequence)` index ordered
//! for O(log n) eviction.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Callback invoked with each evicted entry, while the cache is mid-update.
/// The hook must not call back into the cache.
pub type EvictionHook<K, V> = Box<dyn Fn(&K, &V) + Send>;

struct Slot<V> {
    value: V,
    frequency: u64,
    seq: u64,
}

pub struct LfuCache<K, V> {
    capacity: usize,
    entries: HashMap<K, Slot<V>>,
    /// `(frequency, insertion seq) -> key`, ordered so the eviction victim
    /// is always the first entry
    order: BTreeMap<(u64, u64), K>,
    next_seq: u64,
    on_evict: Option<EvictionHook<K, V>>,
}

impl<K, V> LfuCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            on_evict: None,
        }
    }

    pub fn with_eviction_hook(capacity: usize, hook: EvictionHook<K, V>) -> Self {
        let mut cache = Self::new(capacity);
        cache.on_evict = Some(hook);
        cache
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Look up a value, bumping its access frequency.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.entries.get_mut(key)?;
        let owned = self.order.remove(&(slot.frequency, slot.seq));
        slot.frequency += 1;
        if let Some(owned) = owned {
            self.order.insert((slot.frequency, slot.seq), owned);
        }
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Insert or replace a value. Replacement bumps the frequency; a fresh
    /// insert may evict the current LFU victim first.
    pub fn insert(&mut self, key: K, value: V) {
        if let Some(slot) = self.entries.get_mut(&key) {
            self.order.remove(&(slot.frequency, slot.seq));
            slot.value = value;
            slot.frequency += 1;
            self.order.insert((slot.frequency, slot.seq), key);
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict_one();
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key.clone(),
            Slot {
                value,
                frequency: 1,
                seq,
            },
        );
        self.order.insert((1, seq), key);
    }

    fn evict_one(&mut self) {
        let Some((_, key)) = self.order.pop_first() else {
            return;
        };
        if let Some(slot) = self.entries.remove(&key) {
            if let Some(hook) = &self.on_evict {
                hook(&key, &slot.value);
            }
        }
    }
}
