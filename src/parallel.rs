//! The parallel context: process rank and count from the injected transport,
//! thread width from the execution environment.

use crate::comm::{Comm, LocalComm};
use crate::constants::ENV_NUM_THREADS;
use anyhow::Result;
use std::sync::Arc;

/// Handle to the hybrid execution environment. Passed explicitly into every
/// component that consumes collectives; there is no global singleton.
pub struct Parallel {
    comm: Arc<dyn Comm>,
    n_threads: usize,
}

impl Parallel {
    /// Single-process context with the detected thread width.
    pub fn local() -> Arc<Self> {
        Self::with_comm(Arc::new(LocalComm), detect_threads())
    }

    /// Context over an injected transport with an explicit thread width.
    pub fn with_comm(comm: Arc<dyn Comm>, n_threads: usize) -> Arc<Self> {
        Arc::new(Self { comm, n_threads: n_threads.max(1) })
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    pub fn barrier(&self) -> Result<()> {
        self.comm.barrier()
    }

    pub fn all_to_all(&self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        self.comm.all_to_all(send)
    }

    pub fn all_reduce_sum(&self, value: u64) -> Result<u64> {
        self.comm.all_reduce_sum(value)
    }
}

/// Shared-memory parallelism width: env override, else the machine's CPUs.
pub fn detect_threads() -> usize {
    std::env::var(ENV_NUM_THREADS)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(num_cpus::get)
        .max(1)
}
