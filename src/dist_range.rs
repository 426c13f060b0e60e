//! Lazy integer ranges feeding MapReduce jobs.

use crate::dist_map::DistMap;
use crate::parallel::Parallel;
use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::hash::Hash;
use std::sync::Arc;
use tracing::info;

/// Half-open interval `[lo, hi)` with no stored contents; each integer is
/// materialized only when a MapReduce job visits it.
#[derive(Clone, Copy, Debug)]
pub struct DistRange {
    lo: i64,
    hi: i64,
}

impl DistRange {
    pub fn new(lo: i64, hi: i64) -> Self {
        Self { lo, hi }
    }

    pub fn lo(&self) -> i64 {
        self.lo
    }

    pub fn hi(&self) -> i64 {
        self.hi
    }

    /// Number of integers this rank owns: `i` is processed by rank `i mod P`.
    fn n_local(&self, rank: usize, p: usize) -> (i64, u64) {
        let p = p as i64;
        let offset = (rank as i64 - self.lo).rem_euclid(p);
        let first = self.lo + offset;
        let count = if first < self.hi {
            ((self.hi - first + p - 1) / p) as u64
        } else {
            0
        };
        (first, count)
    }

    /// MapReduce over the range. Collective: every rank calls this with the
    /// same range, mapper, and reducer.
    ///
    /// Integer `i` is handled by rank `i mod P`; within the rank, its local
    /// integers are dealt statically to threads with chunk 1. The mapper's
    /// emissions route through the destination map's distributed `set`, and a
    /// final `sync` folds every emission under `reducer`. With `verbose`,
    /// rank 0 thread 0 logs progress ticks at 10, 20, 40, and 80% of its
    /// share.
    pub fn mapreduce<K, V, M, R>(
        &self,
        ctx: &Arc<Parallel>,
        mapper: M,
        reducer: R,
        verbose: bool,
    ) -> Result<DistMap<K, V>>
    where
        K: Hash + PartialEq + Send + Sync + Serialize + DeserializeOwned,
        V: Send + Sync + Serialize + DeserializeOwned,
        M: Fn(i64, &mut dyn FnMut(K, V)) + Sync,
        R: Fn(&mut V, V) + Sync,
    {
        let dest = DistMap::new(ctx.clone());
        let p = ctx.size();
        let rank = ctx.rank();
        let n_threads = ctx.n_threads();
        let (first, n_local) = self.n_local(rank, p);

        std::thread::scope(|scope| {
            for tid in 0..n_threads {
                let dest = &dest;
                let mapper = &mapper;
                let reducer = &reducer;
                scope.spawn(move || {
                    let mut emit = |key: K, value: V| dest.set(tid, key, value, reducer);
                    let n_mine = n_local / n_threads as u64
                        + u64::from(n_local % n_threads as u64 > tid as u64);
                    let mut done = 0u64;
                    let mut tick = 10u64;
                    let mut j = tid as u64;
                    while j < n_local {
                        let i = first + (j * p as u64) as i64;
                        mapper(i, &mut emit);
                        j += n_threads as u64;
                        done += 1;
                        if verbose && rank == 0 && tid == 0 && tick <= 80 && done * 100 >= tick * n_mine
                        {
                            info!(progress = tick, "mapreduce progress (%)");
                            tick *= 2;
                        }
                    }
                });
            }
        });

        dest.sync(&reducer, verbose)?;
        Ok(dest)
    }
}
