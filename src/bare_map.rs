//! Single-threaded chained hash table with prime-sized bucket arrays.
//!
//! Hash values are supplied by the caller on every operation and stored in the
//! nodes, so the table never needs a hasher of its own: the segmented and
//! distributed layers above strip ownership/segment bits off a hash before
//! handing the remainder down.

use crate::constants::{DEFAULT_MAX_LOAD_FACTOR, N_INITIAL_BUCKETS};
use crate::primes::n_buckets_for;

struct Node<K, V> {
    key: K,
    hash: u64,
    value: V,
    next: Option<Box<Node<K, V>>>,
}

/// Open-chaining hash table. Not shareable across threads; the concurrent
/// layers wrap one of these per segment and per staging cache.
pub struct BareMap<K, V> {
    buckets: Vec<Option<Box<Node<K, V>>>>,
    n_keys: usize,
    max_load_factor: f32,
    rehash_inflation: f32,
}

impl<K, V> BareMap<K, V> {
    pub fn new() -> Self {
        let mut buckets = Vec::new();
        buckets.resize_with(N_INITIAL_BUCKETS, || None);
        Self {
            buckets,
            n_keys: 0,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            rehash_inflation: 1.0,
        }
    }

    pub fn n_keys(&self) -> usize {
        self.n_keys
    }

    pub fn n_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn load_factor(&self) -> f32 {
        self.n_keys as f32 / self.buckets.len() as f32
    }

    pub fn max_load_factor(&self) -> f32 {
        self.max_load_factor
    }

    pub fn set_max_load_factor(&mut self, max_load_factor: f32) {
        self.max_load_factor = max_load_factor;
    }

    pub fn set_rehash_inflation(&mut self, inflation: f32) {
        self.rehash_inflation = inflation;
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    /// Grows the bucket array so that `n_keys_min` keys fit under the load
    /// factor. Never shrinks.
    pub fn reserve(&mut self, n_keys_min: usize) {
        let target = (n_keys_min as f32 / self.max_load_factor).ceil() as usize;
        let wanted = n_buckets_for(target.max(1), self.rehash_inflation);
        if wanted > self.buckets.len() {
            self.rehash_to(wanted);
        }
    }

    /// Visits every entry as `(key, stored hash, value)`.
    pub fn for_each(&self, mut f: impl FnMut(&K, u64, &V)) {
        for bucket in &self.buckets {
            let mut cur = bucket.as_deref();
            while let Some(node) = cur {
                f(&node.key, node.hash, &node.value);
                cur = node.next.as_deref();
            }
        }
    }

    /// Moves every entry out of the table, leaving it empty. Each node's
    /// successor is detached before the node itself is handed to `f`.
    pub fn drain(&mut self, mut f: impl FnMut(K, u64, V)) {
        for bucket in &mut self.buckets {
            let mut chain = bucket.take();
            while let Some(node) = chain {
                let Node { key, hash, value, next } = *node;
                chain = next;
                f(key, hash, value);
            }
        }
        self.n_keys = 0;
    }

    /// Drops every entry. Chains are torn down iteratively, successor first.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            let mut chain = bucket.take();
            while let Some(mut node) = chain {
                chain = node.next.take();
            }
        }
        self.n_keys = 0;
    }

    /// `clear`, then reset the bucket array to its initial size.
    pub fn clear_and_shrink(&mut self) {
        self.clear();
        let mut buckets = Vec::new();
        buckets.resize_with(N_INITIAL_BUCKETS, || None);
        self.buckets = buckets;
    }

    fn rehash_to(&mut self, n_new: usize) {
        let mut fresh = Vec::new();
        fresh.resize_with(n_new, || None);
        let old = std::mem::replace(&mut self.buckets, fresh);
        for mut chain in old {
            while let Some(mut node) = chain {
                chain = node.next.take();
                let idx = (node.hash % n_new as u64) as usize;
                node.next = self.buckets[idx].take();
                self.buckets[idx] = Some(node);
            }
        }
    }
}

impl<K: PartialEq, V> BareMap<K, V> {
    /// Inserts `value` under `key`, or folds it into the present value with
    /// `reducer`. New keys go to the head of their chain. Rehashes afterwards
    /// if the load factor is exceeded.
    pub fn set(&mut self, key: K, hash: u64, value: V, reducer: impl FnOnce(&mut V, V)) {
        let idx = self.bucket_of(hash);
        let mut cur = self.buckets[idx].as_deref_mut();
        while let Some(node) = cur {
            if node.hash == hash && node.key == key {
                reducer(&mut node.value, value);
                return;
            }
            cur = node.next.as_deref_mut();
        }
        let head = self.buckets[idx].take();
        self.buckets[idx] = Some(Box::new(Node { key, hash, value, next: head }));
        self.n_keys += 1;
        if self.n_keys as f32 > self.buckets.len() as f32 * self.max_load_factor {
            let target = (self.n_keys as f32 / self.max_load_factor).ceil() as usize;
            let wanted = n_buckets_for(target, self.rehash_inflation);
            if wanted > self.buckets.len() {
                self.rehash_to(wanted);
            }
        }
    }

    /// Removes `key` by splicing its successor into its slot.
    pub fn unset(&mut self, key: &K, hash: u64) -> bool {
        let idx = self.bucket_of(hash);
        let mut chain = self.buckets[idx].take();
        let mut rebuilt: Option<Box<Node<K, V>>> = None;
        let mut removed = false;
        while let Some(mut node) = chain {
            chain = node.next.take();
            if !removed && node.hash == hash && node.key == *key {
                removed = true;
            } else {
                node.next = rebuilt;
                rebuilt = Some(node);
            }
        }
        self.buckets[idx] = rebuilt;
        if removed {
            self.n_keys -= 1;
        }
        removed
    }

    pub fn get(&self, key: &K, hash: u64) -> Option<&V> {
        let mut cur = self.buckets[self.bucket_of(hash)].as_deref();
        while let Some(node) = cur {
            if node.hash == hash && node.key == *key {
                return Some(&node.value);
            }
            cur = node.next.as_deref();
        }
        None
    }

    pub fn has(&self, key: &K, hash: u64) -> bool {
        self.get(key, hash).is_some()
    }
}

impl<K, V> Default for BareMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Drop for BareMap<K, V> {
    fn drop(&mut self) {
        self.clear();
    }
}
