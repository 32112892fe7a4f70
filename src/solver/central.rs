use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use super::manager::{run_manager_pool_member, run_manager_rank, shutdown_manager, RemotePlanner};
use super::{Deadline, Solver};
use crate::algorithm::{default_horizon, GridPlanner, LowLevelPlanner};
use crate::comm::{
    node_message, take_node, Cluster, Endpoint, Message, Payload, Tag, POLL_INTERVAL,
};
use crate::common::{Conflict, HighLevelNode, MinHeap, ProblemInstance, Solution};
use crate::config::Config;
use crate::stat::SearchStats;
use crate::COST_EPSILON;

/// How long a timed-out coordinator keeps receiving outstanding replies
/// so no worker is left with an unmatched send.
const DRAIN_BUDGET: Duration = Duration::from_secs(5);

/// Coordinator/worker CBS: rank 0 owns the frontier and the incumbent,
/// ranks 1..=E expand plateau nodes, and an optional trailing pool of
/// ranks serves low-level replans through the planner manager.
pub struct CentralisedCbs {
    instance: ProblemInstance,
    world: usize,
    stats: SearchStats,
}

enum RankOutcome {
    Coordinator(Box<CoordinatorResult>),
    Support(f64),
}

struct CoordinatorResult {
    solution: Option<Solution>,
    stats: SearchStats,
    comm_seconds: f64,
}

impl CentralisedCbs {
    /// `world` counts every rank: the coordinator, the expansion workers
    /// and the planner pool.
    pub fn new(instance: ProblemInstance, world: usize) -> Self {
        CentralisedCbs {
            instance,
            world,
            stats: SearchStats::default(),
        }
    }
}

impl Solver for CentralisedCbs {
    fn solve(&mut self, config: &Config) -> Option<Solution> {
        if let Err(err) = config.validate() {
            error!("invalid configuration: {err:#}");
            return None;
        }
        let pool = config.low_level_pool;
        let expanders = match config.expanders {
            Some(expanders) => expanders,
            None => self.world.saturating_sub(1 + pool),
        };
        if expanders == 0 || 1 + expanders + pool != self.world {
            error!(
                world = self.world,
                expanders, pool, "rank layout does not fit the world size"
            );
            return None;
        }
        let manager = (pool > 0).then(|| 1 + expanders);
        let horizon = config
            .horizon
            .unwrap_or_else(|| default_horizon(&self.instance.grid));

        let instance = &self.instance;
        let world = self.world;
        let started = Instant::now();
        let outcomes = Cluster::run(world, |ep| {
            let rank = ep.rank();
            if rank == 0 {
                RankOutcome::Coordinator(Box::new(coordinator(
                    instance, config, ep, expanders, manager,
                )))
            } else if rank <= expanders {
                RankOutcome::Support(worker(instance, ep, manager, horizon))
            } else if rank == 1 + expanders {
                let members: Vec<usize> = (rank + 1..world).collect();
                RankOutcome::Support(run_manager_rank(&instance.grid, ep, members, horizon))
            } else {
                RankOutcome::Support(run_manager_pool_member(&instance.grid, ep))
            }
        });
        let runtime = started.elapsed().as_secs_f64();

        let mut solution = None;
        let mut comm_seconds = Vec::with_capacity(self.world);
        for outcome in outcomes {
            match outcome {
                RankOutcome::Coordinator(result) => {
                    self.stats = result.stats;
                    solution = result.solution;
                    comm_seconds.push(result.comm_seconds);
                }
                RankOutcome::Support(seconds) => comm_seconds.push(seconds),
            }
        }
        self.stats.finish(runtime, &comm_seconds);
        solution
    }

    fn stats(&self) -> &SearchStats {
        &self.stats
    }
}

/// Replies still owed by a worker: `None` before the first message of the
/// reply, `Some(n)` while `n` serialised children are outstanding.
type PendingReplies = HashMap<usize, Option<usize>>;

fn coordinator(
    instance: &ProblemInstance,
    config: &Config,
    mut ep: Endpoint,
    expanders: usize,
    manager: Option<usize>,
) -> CoordinatorResult {
    let deadline = Deadline::new(config.timeout_seconds);
    let mut stats = SearchStats::default();
    let horizon = config
        .horizon
        .unwrap_or_else(|| default_horizon(&instance.grid));
    let mut planner = GridPlanner::with_horizon(&instance.grid, horizon);

    let mut open: MinHeap<HighLevelNode> = MinHeap::new();
    let mut next_id: u64 = 0;
    let mut incumbent: Option<HighLevelNode> = None;

    match HighLevelNode::root(instance, &mut planner) {
        Some(root) => {
            stats.nodes_generated += 1;
            open.push(root.cost as f64, root);
        }
        None => {
            debug!("instance unsolvable at the root");
            shut_down(&mut ep, expanders, manager);
            let comm_seconds = ep.comm_seconds();
            return CoordinatorResult {
                solution: None,
                stats,
                comm_seconds,
            };
        }
    }

    while !open.is_empty() {
        if deadline.expired() {
            stats.timed_out = true;
            break;
        }
        if let Some(ref node) = incumbent {
            // Frontier top can no longer beat the incumbent: proven optimal.
            if open
                .peek_key()
                .is_some_and(|top| top >= node.cost as f64 - COST_EPSILON)
            {
                debug!(cost = node.cost, "incumbent dominates the frontier");
                break;
            }
        }

        // One round: the whole cost plateau, up to one node per worker.
        let mut plateau = open.pop_plateau(COST_EPSILON);
        let overflow = plateau.split_off(plateau.len().min(expanders));
        for (key, node) in overflow {
            open.push(key, node);
        }
        debug!(batch = plateau.len(), "dispatch plateau");

        let incumbent_aux = incumbent.as_ref().map_or(-1, |node| node.cost as i64);
        let mut pending: PendingReplies = HashMap::new();
        for (slot, (_, node)) in plateau.into_iter().enumerate() {
            let worker_rank = 1 + slot;
            let msg = node_message(ep.rank(), Tag::Task, &node, incumbent_aux);
            ep.post_msg(worker_rank, msg);
            pending.insert(worker_rank, None);
            stats.nodes_expanded += 1;
        }

        while !pending.is_empty() {
            if deadline.expired() {
                stats.timed_out = true;
                drain_replies(&mut ep, &mut pending);
                break;
            }
            let Some(msg) = ep.try_recv_matching(&[Tag::Children, Tag::Solution]) else {
                thread::sleep(POLL_INTERVAL);
                continue;
            };
            let src = msg.src;
            match (msg.tag, msg.payload) {
                (Tag::Solution, payload) => {
                    let (mut node, _) = take_node(Message {
                        src,
                        tag: Tag::Solution,
                        payload,
                    });
                    node.recompute_cost();
                    if incumbent.as_ref().is_none_or(|best| node.cost < best.cost) {
                        debug!(cost = node.cost, "new incumbent");
                        incumbent = Some(node);
                    }
                    pending.remove(&src);
                }
                (Tag::Children, Payload::Ints(header)) => {
                    stats.conflicts_detected += 1;
                    let count = header[0] as usize;
                    if count == 0 {
                        pending.remove(&src);
                    } else {
                        pending.insert(src, Some(count));
                    }
                }
                (Tag::Children, payload) => {
                    let (mut child, _) = take_node(Message {
                        src,
                        tag: Tag::Children,
                        payload,
                    });
                    next_id += 1;
                    child.id = next_id;
                    child.recompute_cost();
                    stats.nodes_generated += 1;
                    if incumbent.as_ref().is_none_or(|best| child.cost < best.cost) {
                        open.push(child.cost as f64, child);
                    }
                    match pending.get_mut(&src) {
                        Some(Some(left)) => {
                            *left -= 1;
                            if *left == 0 {
                                pending.remove(&src);
                            }
                        }
                        _ => debug_assert!(false, "child without a count header"),
                    }
                }
                _ => unreachable!("filtered by try_recv_matching"),
            }
        }
        if stats.timed_out {
            break;
        }
    }

    shut_down(&mut ep, expanders, manager);
    let solution = incumbent.map(|node| {
        stats.record_solution(node.cost);
        Solution {
            cost: node.cost,
            paths: node.paths,
        }
    });
    let comm_seconds = ep.comm_seconds();
    CoordinatorResult {
        solution,
        stats,
        comm_seconds,
    }
}

/// Keeps the message layer consistent after a timeout: outstanding
/// replies are received and discarded for at most [`DRAIN_BUDGET`].
fn drain_replies(ep: &mut Endpoint, pending: &mut PendingReplies) {
    let started = Instant::now();
    while !pending.is_empty() && started.elapsed() < DRAIN_BUDGET {
        let Some(msg) = ep.try_recv_matching(&[Tag::Children, Tag::Solution]) else {
            thread::sleep(POLL_INTERVAL);
            continue;
        };
        match (msg.tag, &msg.payload) {
            (Tag::Solution, _) => {
                pending.remove(&msg.src);
            }
            (Tag::Children, Payload::Ints(header)) => {
                if header[0] == 0 {
                    pending.remove(&msg.src);
                } else {
                    pending.insert(msg.src, Some(header[0] as usize));
                }
            }
            (Tag::Children, _) => {
                if let Some(Some(left)) = pending.get_mut(&msg.src) {
                    *left -= 1;
                    if *left == 0 {
                        pending.remove(&msg.src);
                    }
                }
            }
            _ => {}
        }
    }
}

fn shut_down(ep: &mut Endpoint, expanders: usize, manager: Option<usize>) {
    for worker_rank in 1..=expanders {
        ep.post(worker_rank, Tag::Terminate, Payload::Empty);
    }
    if let Some(manager_rank) = manager {
        shutdown_manager(ep, manager_rank);
    }
}

/// Expansion worker: recomputes the sum-of-costs of each received node,
/// detects its first conflict, and answers with either the node as a
/// solution or a pruned set of replanned children.
fn worker(
    instance: &ProblemInstance,
    mut ep: Endpoint,
    manager: Option<usize>,
    horizon: usize,
) -> f64 {
    loop {
        let Some(msg) = ep.try_recv_matching(&[Tag::Task, Tag::Terminate]) else {
            thread::sleep(POLL_INTERVAL);
            continue;
        };
        if msg.tag == Tag::Terminate {
            return ep.comm_seconds();
        }
        let coordinator_rank = msg.src;
        let (mut node, incumbent_aux) = take_node(msg);
        node.recompute_cost();
        let incumbent = (incumbent_aux >= 0).then_some(incumbent_aux as usize);

        let Some(conflict) = node.first_conflict() else {
            let reply = node_message(ep.rank(), Tag::Solution, &node, -1);
            ep.post_msg(coordinator_rank, reply);
            continue;
        };

        let children = match manager {
            Some(manager_rank) => {
                let mut planner = RemotePlanner::new(&mut ep, manager_rank);
                branch_children(&node, instance, &conflict, &mut planner, incumbent)
            }
            None => {
                let mut planner = GridPlanner::with_horizon(&instance.grid, horizon);
                branch_children(&node, instance, &conflict, &mut planner, incumbent)
            }
        };

        ep.post(
            coordinator_rank,
            Tag::Children,
            Payload::Ints(vec![children.len() as i64]),
        );
        for child in &children {
            let reply = node_message(ep.rank(), Tag::Children, child, node.id as i64);
            ep.post_msg(coordinator_rank, reply);
        }
    }
}

/// Builds both children of a conflict, dropping replan failures and any
/// child the incumbent already dominates.
fn branch_children(
    node: &HighLevelNode,
    instance: &ProblemInstance,
    conflict: &Conflict,
    planner: &mut dyn LowLevelPlanner,
    incumbent: Option<usize>,
) -> Vec<HighLevelNode> {
    conflict
        .branch_constraints()
        .into_iter()
        .filter_map(|constraint| node.child(instance, constraint, planner))
        .filter(|child| incumbent.is_none_or(|best| child.cost < best))
        .collect()
}
