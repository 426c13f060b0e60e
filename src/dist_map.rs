//! Process-partitioned view over segmented concurrent maps.
//!
//! A key with hash `h` is owned by rank `h % P`; the owner stores it in its
//! local [`ConcurrentMap`] under the hash `h / P`. Emissions for remote owners
//! accumulate in per-thread per-destination outboxes until [`sync`] drains
//! them through an all-to-all exchange. Until then, reads only reflect local
//! state; after a completed `sync` every key resides exactly on its owner,
//! folded under the job's reducer.
//!
//! [`sync`]: DistMap::sync

use crate::codec::{Bincode, Codec};
use crate::concurrent_map::ConcurrentMap;
use crate::parallel::Parallel;
use crate::reduce;
use anyhow::{ensure, Context, Result};
use fxhash::FxBuildHasher;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{de::DeserializeOwned, Serialize};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use tracing::{debug, info};

pub struct DistMap<K, V, S = FxBuildHasher> {
    ctx: Arc<Parallel>,
    local: ConcurrentMap<K, V>,
    // Flattened [thread][destination rank] pair buffers, appended only by the
    // owning thread, drained under sync.
    outboxes: Vec<Mutex<Vec<(K, V)>>>,
    key_codec: Arc<dyn Codec<K>>,
    val_codec: Arc<dyn Codec<V>>,
    build_hasher: S,
}

impl<K, V> DistMap<K, V>
where
    K: Hash + PartialEq + Send + Sync + Serialize + DeserializeOwned,
    V: Send + Sync + Serialize + DeserializeOwned,
{
    /// Distributed map with the default binary codec and deterministic
    /// default hasher.
    pub fn new(ctx: Arc<Parallel>) -> Self {
        Self::with_codecs(ctx, Arc::new(Bincode), Arc::new(Bincode))
    }

    /// Rebuilds this rank's partition from bytes produced by
    /// [`to_bytes`](Self::to_bytes) under the same world size.
    pub fn from_bytes(ctx: Arc<Parallel>, bytes: &[u8]) -> Result<Self> {
        let map = Self::new(ctx);
        ensure!(bytes.len() >= 8, "truncated map image");
        let count = u64::from_le_bytes(bytes[..8].try_into().context("map image header")?);
        let mut rest = &bytes[8..];
        let p = map.ctx.size() as u64;
        for _ in 0..count {
            let key: K = map.key_codec.decode(&mut rest)?;
            let value: V = map.val_codec.decode(&mut rest)?;
            let h = map.build_hasher.hash_one(&key);
            map.local.set(key, h / p, value, reduce::overwrite);
        }
        Ok(map)
    }
}

impl<K, V> DistMap<K, V>
where
    K: Hash + PartialEq + Send + Sync,
    V: Send + Sync,
{
    /// Distributed map with injected key/value codecs.
    pub fn with_codecs(
        ctx: Arc<Parallel>,
        key_codec: Arc<dyn Codec<K>>,
        val_codec: Arc<dyn Codec<V>>,
    ) -> Self {
        Self::with_parts(ctx, key_codec, val_codec, FxBuildHasher::default())
    }
}

impl<K, V, S> DistMap<K, V, S>
where
    K: Hash + PartialEq + Send + Sync,
    V: Send + Sync,
    S: BuildHasher + Send + Sync,
{
    /// Fully injected construction: codecs and hash function.
    ///
    /// The hasher must be deterministic across processes; partition ownership
    /// is derived from it.
    pub fn with_parts(
        ctx: Arc<Parallel>,
        key_codec: Arc<dyn Codec<K>>,
        val_codec: Arc<dyn Codec<V>>,
        build_hasher: S,
    ) -> Self {
        let n_threads = ctx.n_threads();
        let n_slots = n_threads * ctx.size();
        Self {
            local: ConcurrentMap::with_threads(n_threads),
            outboxes: (0..n_slots).map(|_| Mutex::new(Vec::new())).collect(),
            ctx,
            key_codec,
            val_codec,
            build_hasher,
        }
    }

    pub fn ctx(&self) -> &Arc<Parallel> {
        &self.ctx
    }

    /// The local segmented partition.
    pub fn local(&self) -> &ConcurrentMap<K, V> {
        &self.local
    }

    pub fn hash(&self, key: &K) -> u64 {
        self.build_hasher.hash_one(key)
    }

    /// Rank owning the key with hash `h`.
    pub fn owner(&self, hash: u64) -> usize {
        (hash % self.ctx.size() as u64) as usize
    }

    /// Routes one emission from thread `tid`: locally owned keys go through
    /// the segmented map's non-blocking path, remote keys into the thread's
    /// outbox for the owner. Remote emissions become visible only after
    /// [`sync`](Self::sync) completes on every rank.
    pub fn set(&self, tid: usize, key: K, value: V, reducer: impl FnOnce(&mut V, V)) {
        let h = self.build_hasher.hash_one(&key);
        let p = self.ctx.size() as u64;
        let owner = (h % p) as usize;
        if owner == self.ctx.rank() {
            self.local.async_set(tid, key, h / p, value, reducer);
        } else {
            self.outboxes[tid * self.ctx.size() + owner].lock().push((key, value));
        }
    }

    /// Collective: every rank must call `sync` with the same reducer.
    ///
    /// Flushes the local staging caches, exchanges the outboxes all-to-all
    /// (each destination buffer is an 8-byte little-endian pair count followed
    /// by encoded key/value pairs), then merges received pairs into the local
    /// partition under `reducer`.
    pub fn sync(&self, reducer: impl Fn(&mut V, V) + Sync, verbose: bool) -> Result<()> {
        self.local.sync(&reducer);

        let p = self.ctx.size();
        let me = self.ctx.rank();
        let n_threads = self.ctx.n_threads();
        let mut send = Vec::with_capacity(p);
        let mut n_pairs_out = 0u64;
        for dst in 0..p {
            let mut buf = Vec::new();
            buf.extend_from_slice(&0u64.to_le_bytes());
            let mut count = 0u64;
            for tid in 0..n_threads {
                let pairs = std::mem::take(&mut *self.outboxes[tid * p + dst].lock());
                for (key, value) in &pairs {
                    self.key_codec.encode(key, &mut buf)?;
                    self.val_codec.encode(value, &mut buf)?;
                }
                count += pairs.len() as u64;
            }
            buf[..8].copy_from_slice(&count.to_le_bytes());
            n_pairs_out += count;
            send.push(buf);
        }
        debug!(rank = me, n_pairs_out, "outboxes serialized");

        let recv = self.ctx.all_to_all(send)?;

        let merged: Result<Vec<u64>> = recv
            .par_iter()
            .enumerate()
            .map(|(src, buf)| {
                if src == me {
                    return Ok(0);
                }
                self.merge_exchange_buffer(buf, &reducer)
                    .with_context(|| format!("merging exchange buffer from rank {src}"))
            })
            .collect();
        let n_pairs_in: u64 = merged?.iter().sum();

        if verbose && me == 0 {
            info!(n_pairs_out, n_pairs_in, n_ranks = p, "distributed sync complete");
        }
        Ok(())
    }

    fn merge_exchange_buffer(&self, buf: &[u8], reducer: &(impl Fn(&mut V, V) + Sync)) -> Result<u64> {
        if buf.is_empty() {
            return Ok(0);
        }
        ensure!(buf.len() >= 8, "exchange buffer shorter than its header");
        let count = u64::from_le_bytes(buf[..8].try_into().context("exchange buffer header")?);
        let mut rest = &buf[8..];
        let p = self.ctx.size() as u64;
        for _ in 0..count {
            let key: K = self.key_codec.decode(&mut rest)?;
            let value: V = self.val_codec.decode(&mut rest)?;
            let h = self.build_hasher.hash_one(&key);
            debug_assert_eq!((h % p) as usize, self.ctx.rank(), "received a key owned elsewhere");
            self.local.set(key, h / p, value, reducer);
        }
        Ok(count)
    }

    /// Local-partition lookup. Keys owned by other ranks are not visible
    /// here; a key emitted but not yet synced is not visible either.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let h = self.build_hasher.hash_one(key);
        let p = self.ctx.size() as u64;
        if (h % p) as usize != self.ctx.rank() {
            return None;
        }
        self.local.get(key, h / p)
    }

    pub fn has(&self, key: &K) -> bool {
        let h = self.build_hasher.hash_one(key);
        let p = self.ctx.size() as u64;
        (h % p) as usize == self.ctx.rank() && self.local.has(key, h / p)
    }

    /// Removes `key` from the local partition; no effect if another rank owns it.
    pub fn unset(&self, key: &K) -> bool {
        let h = self.build_hasher.hash_one(key);
        let p = self.ctx.size() as u64;
        (h % p) as usize == self.ctx.rank() && self.local.unset(key, h / p)
    }

    /// Committed keys on this rank.
    pub fn n_keys(&self) -> usize {
        self.local.n_keys()
    }

    /// Collective: global key count via an all-reduce.
    pub fn get_n_keys(&self) -> Result<u64> {
        self.ctx.all_reduce_sum(self.local.n_keys() as u64)
    }

    pub fn n_buckets(&self) -> usize {
        self.local.n_buckets()
    }

    pub fn load_factor(&self) -> f32 {
        self.local.load_factor()
    }

    pub fn max_load_factor(&self) -> f32 {
        self.local.max_load_factor()
    }

    pub fn set_max_load_factor(&self, max_load_factor: f32) {
        self.local.set_max_load_factor(max_load_factor);
    }

    pub fn set_rehash_inflation(&self, inflation: f32) {
        self.local.set_rehash_inflation(inflation);
    }

    /// Pre-sizes the local partition for an even share of `n_keys_min` global
    /// keys.
    pub fn reserve(&self, n_keys_min: usize) {
        self.local.reserve(n_keys_min / self.ctx.size());
    }

    pub fn clear(&self) {
        self.local.clear();
        for outbox in &self.outboxes {
            outbox.lock().clear();
        }
    }

    pub fn clear_and_shrink(&self) {
        self.local.clear_and_shrink();
        for outbox in &self.outboxes {
            let mut pairs = outbox.lock();
            pairs.clear();
            pairs.shrink_to_fit();
        }
    }

    /// Serializes the local partition: pair count, then encoded pairs.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.local.n_keys() as u64).to_le_bytes());
        let mut first_err = None;
        self.local.for_each(|key, value| {
            if first_err.is_some() {
                return;
            }
            let r = self
                .key_codec
                .encode(key, &mut out)
                .and_then(|_| self.val_codec.encode(value, &mut out));
            if let Err(e) = r {
                first_err = Some(e);
            }
        });
        match first_err {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    /// MapReduce over this map's local partition: the mapper sees every
    /// committed `(key, value)`, emissions route into a fresh distributed
    /// map, and a final `sync` folds them under `reducer`. Collective.
    ///
    /// Segments are assigned to threads round-robin; after the preceding
    /// `sync` every key lives only on its owner, so iterating locally covers
    /// the global key set exactly once.
    pub fn mapreduce<KR, VR, M, R>(&self, mapper: M, reducer: R, verbose: bool) -> Result<DistMap<KR, VR>>
    where
        KR: Hash + PartialEq + Send + Sync + Serialize + DeserializeOwned,
        VR: Send + Sync + Serialize + DeserializeOwned,
        M: Fn(&K, &V, &mut dyn FnMut(KR, VR)) + Sync,
        R: Fn(&mut VR, VR) + Sync,
    {
        let dest = DistMap::new(self.ctx.clone());
        let n_threads = self.ctx.n_threads();
        std::thread::scope(|scope| {
            for tid in 0..n_threads {
                let dest = &dest;
                let mapper = &mapper;
                let reducer = &reducer;
                let local = &self.local;
                scope.spawn(move || {
                    let mut seg_idx = tid;
                    while seg_idx < local.n_segments() {
                        let segment = local.segment(seg_idx);
                        segment.for_each(|key, _hash, value| {
                            mapper(key, value, &mut |kr, vr| dest.set(tid, kr, vr, reducer));
                        });
                        drop(segment);
                        seg_idx += n_threads;
                    }
                });
            }
        });
        dest.sync(&reducer, verbose)?;
        Ok(dest)
    }
}
