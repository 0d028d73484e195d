//! Point-to-point and collective messaging between ranks.
//!
//! `ThreadComm` runs every rank as a thread of the same process; messages
//! are byte vectors matched by (source, tag) in arrival order.

use bytemuck::Pod;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::trace;

const TAG_ALLGATHER: u32 = u32::MAX - 1;
const TAG_IRREGULAR: u32 = u32::MAX - 2;
/// Tags at or above this value are used by the collectives.
pub const TAG_RESERVED: u32 = u32::MAX - 15;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug, PartialEq)]
pub enum CommError {
    #[error("Timed out waiting for a message from rank {peer} with tag {tag}")]
    Timeout { peer: usize, tag: u32 },
    #[error("Communicator disconnected")]
    Disconnected,
    #[error("Message of {len} bytes is not a whole number of {elem}-byte elements")]
    Truncated { len: usize, elem: usize },
    #[error("Rank {rank} is outside a communicator of size {size}")]
    InvalidRank { rank: usize, size: usize },
}

pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    /// Sends without waiting for the receiver.
    fn send_bytes(&self, dest: usize, tag: u32, data: Vec<u8>) -> Result<(), CommError>;
    /// Blocks until the next message from `source` with `tag` arrives.
    fn recv_bytes(&self, source: usize, tag: u32) -> Result<Vec<u8>, CommError>;

    fn send<T: Pod>(&self, dest: usize, tag: u32, data: &[T]) -> Result<(), CommError>
    where
        Self: Sized,
    {
        self.send_bytes(dest, tag, bytemuck::cast_slice(data).to_vec())
    }

    fn recv<T: Pod>(&self, source: usize, tag: u32) -> Result<Vec<T>, CommError>
    where
        Self: Sized,
    {
        let bytes = self.recv_bytes(source, tag)?;
        let elem = std::mem::size_of::<T>();
        if elem == 0 || bytes.len() % elem != 0 {
            return Err(CommError::Truncated { len: bytes.len(), elem });
        }
        let mut out = vec![T::zeroed(); bytes.len() / elem];
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&bytes);
        Ok(out)
    }

    /// Sends `data` to `dest` and receives from `source`. A rank paired with
    /// itself gets its own data back without messaging.
    fn sendrecv<T: Pod>(
        &self,
        data: &[T],
        dest: usize,
        source: usize,
        tag: u32,
    ) -> Result<Vec<T>, CommError>
    where
        Self: Sized,
    {
        let me = self.rank();
        if dest == me && source == me {
            return Ok(data.to_vec());
        }
        self.send(dest, tag, data)?;
        self.recv(source, tag)
    }

    /// Every rank's `data`, indexed by rank.
    fn allgather<T: Pod>(&self, data: &[T]) -> Result<Vec<Vec<T>>, CommError>
    where
        Self: Sized,
    {
        let me = self.rank();
        for p in (0..self.size()).filter(|&p| p != me) {
            self.send(p, TAG_ALLGATHER, data)?;
        }
        (0..self.size())
            .map(|p| if p == me { Ok(data.to_vec()) } else { self.recv(p, TAG_ALLGATHER) })
            .collect()
    }

    /// Folds one value per rank with `op` in rank order; every rank gets the
    /// same result.
    fn allreduce<T: Pod>(&self, value: T, op: impl Fn(T, T) -> T) -> Result<T, CommError>
    where
        Self: Sized,
    {
        let all = self.allgather(std::slice::from_ref(&value))?;
        let mut it = all.into_iter().map(|v| v.first().copied().unwrap_or(value));
        let first = it.next().unwrap_or(value);
        Ok(it.fold(first, op))
    }

    fn barrier(&self) -> Result<(), CommError>
    where
        Self: Sized,
    {
        self.allgather(&[0u8]).map(|_| ())
    }
}

struct Envelope {
    source: usize,
    tag: u32,
    data: Vec<u8>,
}

/// One rank of an in-process world.
pub struct ThreadComm {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    pending: RefCell<VecDeque<Envelope>>,
    timeout: Duration,
}

impl ThreadComm {
    /// `n` connected ranks; hand one to each thread.
    pub fn world(n: usize) -> Vec<ThreadComm> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..n).map(|_| channel::unbounded()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ThreadComm {
                rank,
                peers: senders.clone(),
                inbox,
                pending: RefCell::new(VecDeque::new()),
                timeout: DEFAULT_TIMEOUT,
            })
            .collect()
    }

    /// Longest a receive waits before failing with `CommError::Timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn take_pending(&self, source: usize, tag: u32) -> Option<Vec<u8>> {
        let mut pending = self.pending.borrow_mut();
        let pos = pending.iter().position(|e| e.source == source && e.tag == tag)?;
        pending.remove(pos).map(|e| e.data)
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send_bytes(&self, dest: usize, tag: u32, data: Vec<u8>) -> Result<(), CommError> {
        let peer = self.peers.get(dest).ok_or(CommError::InvalidRank {
            rank: dest,
            size: self.peers.len(),
        })?;
        trace!(from = self.rank, to = dest, tag, n_bytes = data.len(), "send");
        peer.send(Envelope {
            source: self.rank,
            tag,
            data,
        })
        .map_err(|_| CommError::Disconnected)
    }

    fn recv_bytes(&self, source: usize, tag: u32) -> Result<Vec<u8>, CommError> {
        if source >= self.peers.len() {
            return Err(CommError::InvalidRank {
                rank: source,
                size: self.peers.len(),
            });
        }
        if let Some(data) = self.take_pending(source, tag) {
            return Ok(data);
        }
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.inbox.recv_deadline(deadline) {
                Ok(e) if e.source == source && e.tag == tag => return Ok(e.data),
                Ok(e) => self.pending.borrow_mut().push_back(e),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(CommError::Timeout { peer: source, tag });
                }
                Err(RecvTimeoutError::Disconnected) => return Err(CommError::Disconnected),
            }
        }
    }
}

/// Runs `f` once per rank of a fresh `n`-rank world, each on its own thread,
/// and returns the results in rank order. A panic on any rank is re-raised.
pub fn run_world<R, F>(n: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(ThreadComm) -> R + Sync,
{
    let comms = ThreadComm::world(n);
    std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    })
}

/// Delivers each `(dest, item)` and returns what this rank received as
/// `(source, item)`, sorted by source and in sending order per source.
///
/// Every rank must call this; a rank with nothing to send passes an empty
/// slice.
pub fn exchange_irregular<C: Communicator, T: Pod>(
    comm: &C,
    sends: &[(usize, T)],
) -> Result<Vec<(usize, T)>, CommError> {
    let me = comm.rank();
    let nprocs = comm.size();
    let mut outgoing: Vec<Vec<T>> = vec![Vec::new(); nprocs];
    for &(dest, item) in sends {
        outgoing
            .get_mut(dest)
            .ok_or(CommError::InvalidRank { rank: dest, size: nprocs })?
            .push(item);
    }
    let counts: Vec<u64> = outgoing.iter().map(|v| v.len() as u64).collect();
    let all_counts = comm.allgather(&counts)?;

    for (dest, items) in outgoing.iter().enumerate() {
        if dest != me && !items.is_empty() {
            comm.send(dest, TAG_IRREGULAR, items)?;
        }
    }
    let mut received = Vec::new();
    for (source, row) in all_counts.iter().enumerate() {
        if row.get(me).copied().unwrap_or(0) == 0 {
            continue;
        }
        let items = if source == me {
            outgoing[me].clone()
        } else {
            comm.recv::<T>(source, TAG_IRREGULAR)?
        };
        received.extend(items.into_iter().map(|item| (source, item)));
    }
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_sendrecv() {
        let out = run_world(4, |comm| {
            let me = comm.rank();
            let n = comm.size();
            comm.sendrecv(&[me as i32 * 10], (me + 1) % n, (me + n - 1) % n, 7)
                .unwrap()
        });
        assert_eq!(out, vec![vec![30], vec![0], vec![10], vec![20]]);
    }

    #[test]
    fn test_messages_matched_by_tag() {
        let out = run_world(2, |comm| {
            if comm.rank() == 0 {
                comm.send(1, 1, &[1.5f64]).unwrap();
                comm.send(1, 2, &[2.5f64]).unwrap();
                comm.send(1, 1, &[3.5f64]).unwrap();
                vec![]
            } else {
                let b: Vec<f64> = comm.recv(0, 2).unwrap();
                let a: Vec<f64> = comm.recv(0, 1).unwrap();
                let c: Vec<f64> = comm.recv(0, 1).unwrap();
                vec![a[0], b[0], c[0]]
            }
        });
        assert_eq!(out[1], vec![1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_collectives() {
        let out = run_world(3, |comm| {
            let me = comm.rank() as u64;
            let all = comm.allgather(&[me, me * me]).unwrap();
            let sum = comm.allreduce(me + 1, |a, b| a + b).unwrap();
            let min = comm.allreduce(me as i32 - 1, i32::min).unwrap();
            comm.barrier().unwrap();
            (all, sum, min)
        });
        for (all, sum, min) in out {
            assert_eq!(all, vec![vec![0, 0], vec![1, 1], vec![2, 4]]);
            assert_eq!(sum, 6);
            assert_eq!(min, -1);
        }
    }

    #[test]
    fn test_irregular_exchange() {
        let out = run_world(3, |comm| {
            let me = comm.rank() as i32;
            // every rank sends (me, k) to rank k for k > me, and one item to itself
            let sends: Vec<(usize, [i32; 2])> = (0..3)
                .filter(|&k| k > me)
                .map(|k| (k as usize, [me, k]))
                .chain(std::iter::once((me as usize, [me, -1])))
                .collect();
            exchange_irregular(&comm, &sends).unwrap()
        });
        assert_eq!(out[0], vec![(0, [0, -1])]);
        assert_eq!(out[1], vec![(0, [0, 1]), (1, [1, -1])]);
        assert_eq!(out[2], vec![(0, [0, 2]), (1, [1, 2]), (2, [2, -1])]);
    }

    #[test]
    fn test_receive_times_out() {
        let mut world = ThreadComm::world(2);
        let comm = world.remove(0).with_timeout(Duration::from_millis(20));
        assert_eq!(comm.recv::<u8>(1, 0), Err(CommError::Timeout { peer: 1, tag: 0 }));
        assert!(matches!(comm.recv::<u8>(5, 0), Err(CommError::InvalidRank { rank: 5, size: 2 })));
    }

    #[test]
    fn test_truncated_message() {
        let world = ThreadComm::world(1);
        let comm = &world[0];
        comm.send_bytes(0, 3, vec![1, 2, 3]).unwrap();
        assert_eq!(comm.recv::<u32>(0, 3), Err(CommError::Truncated { len: 3, elem: 4 }));
    }
}
