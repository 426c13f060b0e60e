//! Collective communication primitives.
//!
//! The engine only ever talks to peers through the [`Comm`] trait: an
//! all-to-all exchange, a sum all-reduce, and a barrier. The crate ships two
//! implementations: a trivial single-process one, and an in-process rank mesh
//! over channels for multi-rank runs and tests. Cluster transports (MPI and
//! friends) are injected from outside as further implementations.

use anyhow::{anyhow, ensure, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

/// Process-level collective context: rank, world size, and the collectives
/// the distributed map relies on.
///
/// Collectives are bulk-synchronous: every rank must enter the same sequence
/// of calls. A failed collective is fatal to the job.
pub trait Comm: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Exchanges one byte buffer per destination rank; returns one buffer per
    /// source rank. `send.len()` must equal `size()`, and `send[rank()]` is
    /// returned unchanged in slot `rank()`.
    fn all_to_all(&self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>>;

    fn all_reduce_sum(&self, value: u64) -> Result<u64>;

    fn barrier(&self) -> Result<()>;
}

/// Single-process world: rank 0 of 1, every collective is a no-op.
#[derive(Clone, Copy, Default)]
pub struct LocalComm;

impl Comm for LocalComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_to_all(&self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        ensure!(send.len() == 1, "all_to_all expects 1 buffer, got {}", send.len());
        Ok(send)
    }

    fn all_reduce_sum(&self, value: u64) -> Result<u64> {
        Ok(value)
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

struct Packet {
    src: usize,
    seq: u64,
    payload: Vec<u8>,
}

/// In-process rank mesh: every rank is an endpoint holding a sender to each
/// peer and one receiver. Packets carry a per-endpoint collective sequence
/// number so that a fast peer's next collective cannot bleed into the current
/// one.
pub struct MeshComm {
    rank: usize,
    size: usize,
    peers: Vec<Sender<Packet>>,
    inbox: Receiver<Packet>,
    seq: Mutex<u64>,
    stash: Mutex<Vec<Packet>>,
}

impl MeshComm {
    /// Builds a fully connected mesh of `size` endpoints. Endpoint `i` of the
    /// returned vector is rank `i`; move each into its own thread.
    pub fn mesh(size: usize) -> Vec<MeshComm> {
        assert!(size > 0, "mesh needs at least one rank");
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| MeshComm {
                rank,
                size,
                peers: senders.clone(),
                inbox,
                seq: Mutex::new(0),
                stash: Mutex::new(Vec::new()),
            })
            .collect()
    }
}

impl Comm for MeshComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_to_all(&self, mut send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        ensure!(
            send.len() == self.size,
            "all_to_all expects {} buffers, got {}",
            self.size,
            send.len()
        );
        let seq = {
            let mut s = self.seq.lock();
            *s += 1;
            *s
        };

        let mut out: Vec<Option<Vec<u8>>> = (0..self.size).map(|_| None).collect();
        for (dst, payload) in send.drain(..).enumerate() {
            if dst == self.rank {
                out[dst] = Some(payload);
            } else {
                self.peers[dst]
                    .send(Packet { src: self.rank, seq, payload })
                    .map_err(|_| anyhow!("rank {dst} left the mesh"))?;
            }
        }

        let mut got = 1;
        // Packets stashed by an earlier call may belong to this collective.
        {
            let mut stash = self.stash.lock();
            let mut kept = Vec::with_capacity(stash.len());
            for pkt in stash.drain(..) {
                if pkt.seq == seq {
                    out[pkt.src] = Some(pkt.payload);
                    got += 1;
                } else {
                    kept.push(pkt);
                }
            }
            *stash = kept;
        }
        while got < self.size {
            let pkt = self
                .inbox
                .recv()
                .context("collective exchange interrupted: a rank left the mesh")?;
            if pkt.seq == seq {
                out[pkt.src] = Some(pkt.payload);
                got += 1;
            } else {
                self.stash.lock().push(pkt);
            }
        }
        Ok(out.into_iter().map(|b| b.unwrap_or_default()).collect())
    }

    fn all_reduce_sum(&self, value: u64) -> Result<u64> {
        let send = vec![value.to_le_bytes().to_vec(); self.size];
        let recv = self.all_to_all(send)?;
        let mut total = 0u64;
        for buf in recv {
            let bytes: [u8; 8] = buf.as_slice().try_into().context("malformed reduce payload")?;
            total = total.wrapping_add(u64::from_le_bytes(bytes));
        }
        Ok(total)
    }

    fn barrier(&self) -> Result<()> {
        self.all_to_all(vec![Vec::new(); self.size]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn mesh_all_to_all_routes_by_rank() {
        let endpoints = MeshComm::mesh(3);
        let results: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|comm| {
                    scope.spawn(move || {
                        let send: Vec<Vec<u8>> =
                            (0..3).map(|dst| vec![comm.rank() as u8, dst as u8]).collect();
                        comm.all_to_all(send).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (rank, recv) in results.iter().enumerate() {
            for (src, buf) in recv.iter().enumerate() {
                assert_eq!(buf, &vec![src as u8, rank as u8]);
            }
        }
    }

    #[test]
    fn mesh_all_reduce_sums_across_ranks() {
        let endpoints = MeshComm::mesh(4);
        let results: Vec<u64> = thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|comm| scope.spawn(move || comm.all_reduce_sum(comm.rank() as u64 + 1).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results, vec![10, 10, 10, 10]);
    }

    #[test]
    fn back_to_back_collectives_do_not_interleave() {
        let endpoints = MeshComm::mesh(2);
        let results: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|comm| {
                    scope.spawn(move || {
                        let mut seen = Vec::new();
                        for round in 0..50u8 {
                            let send = vec![vec![round]; 2];
                            let recv = comm.all_to_all(send).unwrap();
                            seen.push(recv);
                        }
                        seen
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for per_rank in results {
            for (round, recv) in per_rank.iter().enumerate() {
                for buf in recv {
                    assert_eq!(buf, &vec![round as u8]);
                }
            }
        }
    }
}
