use std::time::Instant;

use tracing::{debug, error};

use super::{Deadline, Solver};
use crate::algorithm::{default_horizon, GridPlanner};
use crate::comm::{
    node_message, take_node, Cluster, Endpoint, PendingSendPool, Reduce, Tag,
};
use crate::common::{HighLevelNode, MinHeap, ProblemInstance, Solution};
use crate::config::Config;
use crate::stat::SearchStats;
use crate::COST_EPSILON;

/// Fully symmetric CBS: every rank owns an open set, children are handed
/// off round-robin, and three allreduce barriers per iteration keep the
/// peers agreed on the global lower bound, the best known solution and
/// the timeout. With `suboptimality = 1` the admission gate enforces
/// global best-first order; with `w > 1` the reported cost is within a
/// factor `w` of optimal.
pub struct DecentralisedCbs {
    instance: ProblemInstance,
    world: usize,
    stats: SearchStats,
}

struct PeerResult {
    solution: Option<Solution>,
    stats: SearchStats,
    comm_seconds: f64,
}

impl DecentralisedCbs {
    pub fn new(instance: ProblemInstance, world: usize) -> Self {
        DecentralisedCbs {
            instance,
            world,
            stats: SearchStats::default(),
        }
    }
}

impl Solver for DecentralisedCbs {
    fn solve(&mut self, config: &Config) -> Option<Solution> {
        if let Err(err) = config.validate() {
            error!("invalid configuration: {err:#}");
            return None;
        }
        let instance = &self.instance;
        let started = Instant::now();
        let results = Cluster::run(self.world, |ep| peer(instance, config, ep));
        let runtime = started.elapsed().as_secs_f64();

        self.stats = SearchStats::default();
        let mut comm_seconds = Vec::with_capacity(results.len());
        let mut solution: Option<Solution> = None;
        for result in results {
            self.stats.nodes_expanded += result.stats.nodes_expanded;
            self.stats.nodes_generated += result.stats.nodes_generated;
            self.stats.conflicts_detected += result.stats.conflicts_detected;
            self.stats.timed_out |= result.stats.timed_out;
            comm_seconds.push(result.comm_seconds);
            if let Some(candidate) = result.solution {
                if solution
                    .as_ref()
                    .is_none_or(|best| candidate.cost < best.cost)
                {
                    solution = Some(candidate);
                }
            }
        }
        if let Some(ref best) = solution {
            self.stats.record_solution(best.cost);
        }
        self.stats.finish(runtime, &comm_seconds);
        solution
    }

    fn stats(&self) -> &SearchStats {
        &self.stats
    }
}

fn peer(instance: &ProblemInstance, config: &Config, mut ep: Endpoint) -> PeerResult {
    let deadline = Deadline::new(config.timeout_seconds);
    let mut stats = SearchStats::default();
    let horizon = config
        .horizon
        .unwrap_or_else(|| default_horizon(&instance.grid));
    let mut planner = GridPlanner::with_horizon(&instance.grid, horizon);

    let world = ep.world_size();
    let me = ep.rank();
    let mut open: MinHeap<HighLevelNode> = MinHeap::new();
    let mut pool = PendingSendPool::new();
    let mut best: Option<HighLevelNode> = None;
    // Ids stride by the world size so no two ranks mint the same one.
    let mut next_id = me as u64;
    let mut rr = (me + 1) % world;

    // Every rank plans the root locally; unsolvable instances leave every
    // open set empty and the lower-bound reduction ends the search.
    if let Some(root) = HighLevelNode::root(instance, &mut planner) {
        stats.nodes_generated += 1;
        open.push(root.cost as f64, root);
    }

    loop {
        pool.poll(&ep);

        let timeout_flag = if deadline.expired() { 1.0 } else { 0.0 };
        if ep.allreduce(timeout_flag, Reduce::Max) > 0.0 {
            stats.timed_out = true;
            break;
        }

        drain_handoffs(&mut ep, &mut open);

        // Undelivered hand-offs still parked in the send pool count
        // toward the local bound, otherwise two idle peers could agree on
        // "no work anywhere" while a frame is stuck between them.
        let local_top = open
            .peek_key()
            .unwrap_or(f64::INFINITY)
            .min(pool.min_node_cost().unwrap_or(f64::INFINITY));
        let lower_bound = ep.allreduce(local_top, Reduce::Min);

        let local_best = best.as_ref().map_or(f64::INFINITY, |node| node.cost as f64);
        let global_best = ep.allreduce(local_best, Reduce::Min);
        if global_best.is_finite() {
            debug!(rank = me, global_best, "solution agreed, stopping");
            break;
        }
        if lower_bound.is_infinite() {
            debug!(rank = me, "no open work anywhere, instance unsolvable");
            break;
        }

        let bound = config.suboptimality * lower_bound;
        // An idle peer keeps cycling the barriers; hand-offs will arrive.
        let Some((key, node)) = open.pop() else { continue };
        if key > bound + COST_EPSILON {
            // Too expensive to expand yet; wait for the bound to catch up.
            open.push(key, node);
            continue;
        }
        stats.nodes_expanded += 1;

        let Some(conflict) = node.first_conflict() else {
            debug!(rank = me, cost = node.cost, "local incumbent");
            if best.as_ref().is_none_or(|b| node.cost < b.cost) {
                best = Some(node);
            }
            continue;
        };
        stats.conflicts_detected += 1;

        for constraint in conflict.branch_constraints() {
            // Draining before each send keeps both peers making progress
            // when two ranks burst frames at each other.
            drain_handoffs(&mut ep, &mut open);
            let Some(mut child) = node.child(instance, constraint, &mut planner) else {
                continue;
            };
            next_id += world as u64;
            child.id = next_id;
            stats.nodes_generated += 1;

            let dst = rr;
            rr = (rr + 1) % world;
            if dst == me {
                open.push(child.cost as f64, child);
            } else {
                let msg = node_message(me, Tag::DpNode, &child, -1);
                pool.post(&mut ep, dst, msg);
            }
        }
    }

    // Parked frames are dropped, not flushed: the exit was agreed through
    // the collectives, and a blocking flush here could face a peer that
    // has stopped receiving. An exit with parked work can only follow a
    // solution or a timeout, never the empty-frontier exit, because
    // parked frames feed the lower bound.
    drop(pool);

    let solution = best.map(|node| Solution {
        cost: node.cost,
        paths: node.paths,
    });
    PeerResult {
        solution,
        stats,
        comm_seconds: ep.comm_seconds(),
    }
}

fn drain_handoffs(ep: &mut Endpoint, open: &mut MinHeap<HighLevelNode>) {
    while let Some(msg) = ep.try_recv_matching(&[Tag::DpNode]) {
        let (mut node, _) = take_node(msg);
        node.recompute_cost();
        open.push(node.cost as f64, node);
    }
}
