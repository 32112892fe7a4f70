//! Message layer for the distributed drivers: typed tags, serialised
//! high-level-node frames, in-process rank endpoints and the pending
//! async-send pool.
//!
//! Ranks are OS threads connected by bounded FIFO channels; there is no
//! shared mutable state between them. Messages from one rank to another
//! arrive in send order, which the node frame protocol and the collective
//! implementation both rely on.

mod frame;
mod pending;

pub use frame::{node_message, take_node, NodeFrame, CONSTRAINT_INTS, HEADER_LEN};
pub(crate) use frame::{constraint_from_ints, push_constraint_ints};
pub use pending::{PendingSendPool, PENDING_SEND_CAPACITY};

use std::collections::{HashMap, VecDeque};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Bounded inbox size per rank; senders that hit a full inbox fall back to
/// the pending-send pool.
pub const MAILBOX_CAPACITY: usize = 256;

/// Poll interval of every busy-wait loop in the drivers.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Message tags. The numbering mirrors the wire protocol: 1xx for the
/// high-level coordinator/worker exchange, 2xx for low-level traffic,
/// 3xx for peer-to-peer node hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Task = 100,
    Children = 101,
    Solution = 102,
    Idle = 103,
    Terminate = 104,
    Incumbent = 105,
    LlTask = 200,
    LlResult = 201,
    LlTerminate = 202,
    LlRequest = 210,
    LlResponse = 211,
    DpNode = 300,
    /// Internal to the allreduce implementation; never matched by drivers.
    Collective = 500,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Empty,
    Ints(Vec<i64>),
    Node(Box<NodeFrame>),
}

impl Payload {
    /// The int body of a message known by its tag to carry one.
    pub fn into_ints(self) -> Vec<i64> {
        match self {
            Payload::Ints(ints) => ints,
            other => {
                debug_assert!(false, "expected int payload, got {other:?}");
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub src: usize,
    pub tag: Tag,
    pub payload: Payload,
}

/// Reduction operators supported by [`Endpoint::allreduce`].
#[derive(Debug, Clone, Copy)]
pub enum Reduce {
    Min,
    Max,
}

/// One rank's handle on the cluster: senders to every rank (itself
/// included, which also keeps its own inbox connected) and its receiving
/// end. All suspension is explicit: probes, receives and collectives.
pub struct Endpoint {
    rank: usize,
    peers: Vec<Sender<Message>>,
    inbox: Receiver<Message>,
    stash: VecDeque<Message>,
    collective_seq: u64,
    collective_early: HashMap<u64, Vec<u64>>,
    comm_time: Duration,
}

impl Endpoint {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.peers.len()
    }

    /// Seconds this rank has spent blocked on receives and collectives.
    pub fn comm_seconds(&self) -> f64 {
        self.comm_time.as_secs_f64()
    }

    pub fn message(&self, tag: Tag, payload: Payload) -> Message {
        Message {
            src: self.rank,
            tag,
            payload,
        }
    }

    /// Blocking send. A disconnected destination has already exited its
    /// driver loop; the message is dropped, matching a network that no
    /// longer routes to a finished rank.
    pub fn post(&mut self, dst: usize, tag: Tag, payload: Payload) {
        let msg = self.message(tag, payload);
        self.post_msg(dst, msg);
    }

    pub fn post_msg(&mut self, dst: usize, msg: Message) {
        let started = Instant::now();
        let _ = self.peers[dst].send(msg);
        self.comm_time += started.elapsed();
    }

    /// Non-blocking send; hands the message back when the destination
    /// inbox is full so the caller can park it in a pending pool.
    pub fn try_post(&self, dst: usize, msg: Message) -> Result<(), Message> {
        match self.peers[dst].try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => Err(msg),
            // Finished rank; drop, as with post().
            Err(TrySendError::Disconnected(_)) => Ok(()),
        }
    }

    /// Non-blocking receive of the first pending message carrying one of
    /// `tags`. Messages with other tags are stashed, not lost.
    pub fn try_recv_matching(&mut self, tags: &[Tag]) -> Option<Message> {
        if let Some(at) = self.stash.iter().position(|m| tags.contains(&m.tag)) {
            return self.stash.remove(at);
        }
        while let Ok(msg) = self.inbox.try_recv() {
            if tags.contains(&msg.tag) {
                return Some(msg);
            }
            self.stash.push_back(msg);
        }
        None
    }

    /// Blocking receive with the 1 ms poll cadence shared by all drivers.
    pub fn recv_matching(&mut self, tags: &[Tag]) -> Message {
        let started = Instant::now();
        loop {
            if let Some(msg) = self.try_recv_matching(tags) {
                self.comm_time += started.elapsed();
                return msg;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Reduces `value` across every rank; all ranks observe the same
    /// result. Every rank must call collectives in the same order; the
    /// round sequence number only disambiguates a fast peer that has
    /// already moved on to the next collective.
    pub fn allreduce(&mut self, value: f64, op: Reduce) -> f64 {
        if self.world_size() == 1 {
            return value;
        }
        let started = Instant::now();
        let seq = self.collective_seq;
        self.collective_seq += 1;

        let body = vec![seq as i64, value.to_bits() as i64];
        for dst in 0..self.world_size() {
            if dst != self.rank {
                let msg = self.message(Tag::Collective, Payload::Ints(body.clone()));
                let _ = self.peers[dst].send(msg);
            }
        }

        let mut incoming = self.collective_early.remove(&seq).unwrap_or_default();
        while incoming.len() < self.world_size() - 1 {
            let (their_seq, bits) = self.recv_collective();
            if their_seq == seq {
                incoming.push(bits);
            } else {
                debug_assert!(their_seq > seq, "collective round went backwards");
                self.collective_early.entry(their_seq).or_default().push(bits);
            }
        }

        let mut acc = value;
        for bits in incoming {
            let theirs = f64::from_bits(bits);
            acc = match op {
                Reduce::Min => acc.min(theirs),
                Reduce::Max => acc.max(theirs),
            };
        }
        self.comm_time += started.elapsed();
        acc
    }

    fn recv_collective(&mut self) -> (u64, u64) {
        let msg = match self
            .stash
            .iter()
            .position(|m| m.tag == Tag::Collective)
        {
            Some(at) => self.stash.remove(at).unwrap(),
            None => loop {
                // Cannot disconnect: this endpoint holds a sender to its
                // own inbox.
                let msg = self.inbox.recv().expect("own inbox disconnected");
                if msg.tag == Tag::Collective {
                    break msg;
                }
                self.stash.push_back(msg);
            },
        };
        let body = msg.payload.into_ints();
        debug_assert_eq!(body.len(), 2, "collective body is (seq, bits)");
        (body[0] as u64, body[1] as u64)
    }
}

/// Spawns `world` ranks, runs `f` on each with its endpoint, and collects
/// the per-rank results in rank order.
pub struct Cluster;

impl Cluster {
    pub fn run<R, F>(world: usize, f: F) -> Vec<R>
    where
        F: Fn(Endpoint) -> R + Sync,
        R: Send,
    {
        assert!(world > 0, "cluster needs at least one rank");
        let mut txs = Vec::with_capacity(world);
        let mut rxs = Vec::with_capacity(world);
        for _ in 0..world {
            let (tx, rx) = bounded(MAILBOX_CAPACITY);
            txs.push(tx);
            rxs.push(rx);
        }
        let endpoints: Vec<Endpoint> = rxs
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Endpoint {
                rank,
                peers: txs.clone(),
                inbox,
                stash: VecDeque::new(),
                collective_seq: 0,
                collective_early: HashMap::new(),
                comm_time: Duration::ZERO,
            })
            .collect();
        drop(txs);

        thread::scope(|scope| {
            let f = &f;
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|ep| scope.spawn(move || f(ep)))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}
