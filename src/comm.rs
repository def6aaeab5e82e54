//! Collective operations between cooperating ranks.
//!
//! Ranks run the same program in lock-step. Every operation in this module is
//! a blocking collective: all ranks must call it, in the same order and with
//! the same root, or the cluster deadlocks. Payloads cross rank boundaries by
//! value, encoded with bincode, so nothing here relies on shared memory
//! identity.
//!
//! A rank that stops early, by returning or by panicking, makes every
//! collective still waiting on it fail with [`AngioError::RankLeft`].

use crate::error::{AngioError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Rank that draws random numbers and reduces gathered data.
pub const ROOT: usize = 0;

/// Byte-level message passing between ranks.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Root receives every rank's payload in rank order, other ranks get `None`.
    fn gather_bytes(&self, payload: Vec<u8>, root: usize) -> Result<Option<Vec<Vec<u8>>>>;

    /// Every rank receives the root's payload. Payloads from other ranks are ignored.
    fn broadcast_bytes(&self, payload: Vec<u8>, root: usize) -> Result<Vec<u8>>;

    fn barrier(&self) -> Result<()>;
}

/// Typed collectives on top of [`Communicator`].
pub trait CommExt: Communicator {
    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    /// Gathers one value per rank on `root`, in rank order.
    fn gather<T>(&self, value: &T, root: usize) -> Result<Option<Vec<T>>>
    where
        T: Serialize + DeserializeOwned,
    {
        let payload = bincode::serialize(value)?;
        match self.gather_bytes(payload, root)? {
            Some(parts) => {
                let values = parts
                    .iter()
                    .map(|bytes| bincode::deserialize(bytes))
                    .collect::<std::result::Result<Vec<T>, _>>()?;
                Ok(Some(values))
            }
            None => Ok(None),
        }
    }

    /// Broadcasts the root's value. Only the root's `value` is read; the
    /// root passing `None` fails on every rank alike.
    fn broadcast<T>(&self, value: Option<T>, root: usize) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let payload = if self.rank() == root {
            bincode::serialize(&value)?
        } else {
            Vec::new()
        };
        let received = self.broadcast_bytes(payload, root)?;
        let decoded: Option<T> = bincode::deserialize(&received)?;
        decoded.ok_or(AngioError::Precondition("root rank did not supply a value to broadcast"))
    }

    /// Every rank receives every rank's value, in rank order.
    fn all_gather<T: Serialize + DeserializeOwned>(&self, value: &T) -> Result<Vec<T>> {
        let gathered = self.gather(value, ROOT)?;
        self.broadcast(gathered, ROOT)
    }
}

impl<C: Communicator + ?Sized> CommExt for C {}

/// The trivial communicator of a run with a single rank.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn gather_bytes(&self, payload: Vec<u8>, _root: usize) -> Result<Option<Vec<Vec<u8>>>> {
        Ok(Some(vec![payload]))
    }

    fn broadcast_bytes(&self, payload: Vec<u8>, _root: usize) -> Result<Vec<u8>> {
        Ok(payload)
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    // First rank that stopped taking part in collectives.
    left: Option<usize>,
}

// Like `std::sync::Barrier`, but a departed rank releases everyone still waiting.
#[derive(Debug)]
struct RankBarrier {
    size: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl RankBarrier {
    fn new(size: usize) -> Self {
        RankBarrier { size, state: Mutex::new(BarrierState::default()), released: Condvar::new() }
    }

    fn wait(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(rank) = state.left {
            return Err(AngioError::RankLeft(rank));
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.size {
            state.arrived = 0;
            state.generation += 1;
            self.released.notify_all();
            return Ok(());
        }
        loop {
            state = self.released.wait(state).unwrap_or_else(|poisoned| poisoned.into_inner());
            if state.generation != generation {
                return Ok(());
            }
            if let Some(rank) = state.left {
                return Err(AngioError::RankLeft(rank));
            }
        }
    }

    fn leave(&self, rank: usize) {
        lock(&self.state).left.get_or_insert(rank);
        self.released.notify_all();
    }
}

#[derive(Debug)]
struct ClusterShared {
    barrier: RankBarrier,
    slots: Mutex<Vec<Option<Vec<u8>>>>,
    broadcast: Mutex<Vec<u8>>,
}

// Marks its rank as gone when the rank's closure ends, including by unwinding.
struct LeaveOnDrop<'a> {
    rank: usize,
    barrier: &'a RankBarrier,
}

impl Drop for LeaveOnDrop<'_> {
    fn drop(&mut self) {
        self.barrier.leave(self.rank);
    }
}

/// Runs `size` ranks as threads of this process, exchanging messages through
/// shared mailboxes guarded by a barrier.
pub struct LocalCluster;

impl LocalCluster {
    /// Spawns one thread per rank, runs `f` on each and returns the results in rank order.
    ///
    /// A rank that finishes while others still wait in a collective makes
    /// those collectives fail. A panic on any rank is re-raised here once
    /// every thread has stopped.
    pub fn run<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(LocalRank) -> R + Sync,
        R: Send,
    {
        let shared = Arc::new(ClusterShared {
            barrier: RankBarrier::new(size),
            slots: Mutex::new(vec![None; size]),
            broadcast: Mutex::new(Vec::new()),
        });

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..size)
                .map(|rank| {
                    let comm = LocalRank { rank, size, shared: Arc::clone(&shared) };
                    let shared = &shared;
                    let f = &f;
                    scope.spawn(move || {
                        let _leave = LeaveOnDrop { rank, barrier: &shared.barrier };
                        f(comm)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }
}

/// One rank of a [`LocalCluster`].
#[derive(Debug)]
pub struct LocalRank {
    rank: usize,
    size: usize,
    shared: Arc<ClusterShared>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Communicator for LocalRank {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn gather_bytes(&self, payload: Vec<u8>, root: usize) -> Result<Option<Vec<Vec<u8>>>> {
        lock(&self.shared.slots)[self.rank] = Some(payload);
        self.shared.barrier.wait()?;
        let gathered = if self.rank == root {
            let mut slots = lock(&self.shared.slots);
            Some(slots.iter_mut().map(|slot| slot.take().unwrap_or_default()).collect())
        } else {
            None
        };
        // Slots are free again only once the root has drained them.
        self.shared.barrier.wait()?;
        Ok(gathered)
    }

    fn broadcast_bytes(&self, payload: Vec<u8>, root: usize) -> Result<Vec<u8>> {
        if self.rank == root {
            *lock(&self.shared.broadcast) = payload;
        }
        self.shared.barrier.wait()?;
        let received = lock(&self.shared.broadcast).clone();
        self.shared.barrier.wait()?;
        Ok(received)
    }

    fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_process_collectives_are_identity() {
        let comm = SingleProcess;
        assert_eq!(comm.gather(&7u32, ROOT).unwrap(), Some(vec![7]));
        assert_eq!(comm.broadcast(Some(3u8), ROOT).unwrap(), 3);
        assert_eq!(comm.all_gather(&"a".to_string()).unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn gather_collects_in_rank_order_on_root_only() {
        let results = LocalCluster::run(4, |comm| comm.gather(&(comm.rank() * 10), ROOT).unwrap());
        assert_eq!(results[0], Some(vec![0, 10, 20, 30]));
        assert!(results[1..].iter().all(Option::is_none));
    }

    #[test]
    fn broadcast_delivers_root_value_everywhere() {
        let results = LocalCluster::run(3, |comm| {
            let proposal = if comm.is_root() { Some(vec![1.5f64, 2.5]) } else { None };
            comm.broadcast(proposal, ROOT).unwrap()
        });
        assert!(results.iter().all(|v| v == &vec![1.5, 2.5]));
    }

    #[test]
    fn repeated_all_gathers_do_not_mix_rounds() {
        let results = LocalCluster::run(3, |comm| {
            (0..20u64)
                .map(|round| comm.all_gather(&(round * 100 + comm.rank() as u64)).unwrap())
                .collect::<Vec<_>>()
        });
        for rank_view in &results {
            for (round, values) in rank_view.iter().enumerate() {
                let base = round as u64 * 100;
                assert_eq!(values, &vec![base, base + 1, base + 2]);
            }
        }
    }

    #[test]
    fn early_exit_releases_waiting_ranks() {
        let results = LocalCluster::run(3, |comm| {
            if comm.rank() == 1 {
                return None;
            }
            Some(matches!(comm.all_gather(&comm.rank()), Err(AngioError::RankLeft(1))))
        });
        assert_eq!(results, vec![Some(true), None, Some(true)]);
    }

    #[test]
    fn panicking_rank_does_not_hang_the_others() {
        let outcome = std::panic::catch_unwind(|| {
            LocalCluster::run(2, |comm| {
                if comm.rank() == 1 {
                    panic!("rank 1 gives up");
                }
                comm.barrier().is_err()
            })
        });
        assert!(outcome.is_err());
    }

    #[test]
    fn root_without_value_fails_on_every_rank() {
        let results = LocalCluster::run(2, |comm| comm.broadcast::<u32>(None, ROOT).is_err());
        assert_eq!(results, vec![true, true]);
    }
}
