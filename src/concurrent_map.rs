//! Thread-safe segmented hash table.
//!
//! The table is an array of `S = T * 7` independently locked segments, each a
//! [`BareMap`], plus one staging cache per thread. A hash `h` routes to
//! segment `h % S`; the segment's bare map then works with `h / S`, so the
//! bucket choice inside a segment stays uncorrelated with the segment index.
//!
//! `async_set` is the contention-tolerant path: it try-locks the target
//! segment and, on a miss, combines the write into the calling thread's
//! staging cache (keyed by the full hash, so a later `sync` can reroute it).
//! `sync` drains every staging cache into the segments under blocking locks.

use crate::bare_map::BareMap;
use crate::constants::{CACHE_RESERVE_DIVISOR, SEGMENTS_PER_THREAD};
use crate::parallel::detect_threads;
use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;

pub struct ConcurrentMap<K, V> {
    n_threads: usize,
    segments: Vec<Mutex<BareMap<K, V>>>,
    caches: Vec<Mutex<BareMap<K, V>>>,
}

impl<K, V> ConcurrentMap<K, V>
where
    K: PartialEq + Send,
    V: Send,
{
    /// Table sized for the detected thread width.
    pub fn new() -> Self {
        Self::with_threads(detect_threads())
    }

    /// Table with `n_threads` staging caches and `n_threads * 7` segments.
    /// Thread ids passed to [`async_set`](Self::async_set) must stay below
    /// `n_threads`.
    pub fn with_threads(n_threads: usize) -> Self {
        let n_threads = n_threads.max(1);
        let n_segments = n_threads * SEGMENTS_PER_THREAD;
        Self {
            n_threads,
            segments: (0..n_segments).map(|_| Mutex::new(BareMap::new())).collect(),
            caches: (0..n_threads).map(|_| Mutex::new(BareMap::new())).collect(),
        }
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    pub(crate) fn n_segments(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn segment(&self, idx: usize) -> MutexGuard<'_, BareMap<K, V>> {
        self.segments[idx].lock()
    }

    /// Committed key count: the sum over segments. Staging caches are
    /// transient and not counted.
    pub fn n_keys(&self) -> usize {
        self.segments.iter().map(|s| s.lock().n_keys()).sum()
    }

    pub fn n_buckets(&self) -> usize {
        self.segments.iter().map(|s| s.lock().n_buckets()).sum()
    }

    pub fn load_factor(&self) -> f32 {
        let (keys, buckets) = self.segments.iter().fold((0usize, 0usize), |(k, b), s| {
            let s = s.lock();
            (k + s.n_keys(), b + s.n_buckets())
        });
        keys as f32 / buckets as f32
    }

    pub fn max_load_factor(&self) -> f32 {
        self.segments[0].lock().max_load_factor()
    }

    pub fn set_max_load_factor(&self, max_load_factor: f32) {
        for seg in self.segments.iter().chain(self.caches.iter()) {
            seg.lock().set_max_load_factor(max_load_factor);
        }
    }

    pub fn set_rehash_inflation(&self, inflation: f32) {
        for seg in self.segments.iter().chain(self.caches.iter()) {
            seg.lock().set_rehash_inflation(inflation);
        }
    }

    /// Pre-sizes every segment for `n_keys_min / S` keys and every staging
    /// cache for `n_keys_min / 1000`.
    pub fn reserve(&self, n_keys_min: usize) {
        let per_segment = n_keys_min / self.segments.len();
        for seg in &self.segments {
            seg.lock().reserve(per_segment);
        }
        let per_cache = n_keys_min / CACHE_RESERVE_DIVISOR;
        for cache in &self.caches {
            cache.lock().reserve(per_cache);
        }
    }

    /// Blocking insert-or-combine on the owning segment.
    pub fn set(&self, key: K, hash: u64, value: V, reducer: impl FnOnce(&mut V, V)) {
        let n_segments = self.segments.len() as u64;
        let seg = (hash % n_segments) as usize;
        self.segments[seg].lock().set(key, hash / n_segments, value, reducer);
    }

    /// Non-blocking insert-or-combine: try-locks the owning segment and falls
    /// through to thread `tid`'s staging cache when the segment is contended.
    /// Writes staged here are invisible until [`sync`](Self::sync).
    pub fn async_set(&self, tid: usize, key: K, hash: u64, value: V, reducer: impl FnOnce(&mut V, V)) {
        let n_segments = self.segments.len() as u64;
        let seg = (hash % n_segments) as usize;
        match self.segments[seg].try_lock() {
            Some(mut segment) => segment.set(key, hash / n_segments, value, reducer),
            None => self.caches[tid].lock().set(key, hash, value, reducer),
        }
    }

    /// Drains every staging cache into the segments, combining under
    /// `reducer`. Afterwards all staged writes are committed and every cache
    /// is empty.
    pub fn sync(&self, reducer: impl Fn(&mut V, V) + Sync)
    where
        K: Sync,
        V: Sync,
    {
        let n_segments = self.segments.len() as u64;
        self.caches.par_iter().for_each(|cache| {
            cache.lock().drain(|key, hash, value| {
                let seg = (hash % n_segments) as usize;
                self.segments[seg].lock().set(key, hash / n_segments, value, &reducer);
            });
        });
    }

    /// Blocking remove on the owning segment.
    pub fn unset(&self, key: &K, hash: u64) -> bool {
        let n_segments = self.segments.len() as u64;
        let seg = (hash % n_segments) as usize;
        self.segments[seg].lock().unset(key, hash / n_segments)
    }

    pub fn get(&self, key: &K, hash: u64) -> Option<V>
    where
        V: Clone,
    {
        let n_segments = self.segments.len() as u64;
        let seg = (hash % n_segments) as usize;
        self.segments[seg].lock().get(key, hash / n_segments).cloned()
    }

    pub fn has(&self, key: &K, hash: u64) -> bool {
        let n_segments = self.segments.len() as u64;
        let seg = (hash % n_segments) as usize;
        self.segments[seg].lock().has(key, hash / n_segments)
    }

    /// Empties the table. Segment locks are taken in index order and held
    /// together, so concurrent writers observe either the full table or the
    /// empty one. Staging caches are discarded as well.
    pub fn clear(&self) {
        let mut guards: Vec<_> = self.segments.iter().map(|s| s.lock()).collect();
        for seg in &mut guards {
            seg.clear();
        }
        drop(guards);
        for cache in &self.caches {
            cache.lock().clear();
        }
    }

    /// `clear`, plus reset every bucket array to its initial size.
    pub fn clear_and_shrink(&self) {
        let mut guards: Vec<_> = self.segments.iter().map(|s| s.lock()).collect();
        for seg in &mut guards {
            seg.clear_and_shrink();
        }
        drop(guards);
        for cache in &self.caches {
            cache.lock().clear_and_shrink();
        }
    }

    /// Visits every committed entry under all segment locks, in segment order.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        let guards: Vec<_> = self.segments.iter().map(|s| s.lock()).collect();
        for seg in &guards {
            seg.for_each(|key, _hash, value| f(key, value));
        }
    }
}

impl<K, V> Default for ConcurrentMap<K, V>
where
    K: PartialEq + Send,
    V: Send,
{
    fn default() -> Self {
        Self::new()
    }
}
