use tracing::debug;

use crate::algorithm::{run_expander, LowLevelPlanner, PooledAStar};
use crate::comm::{
    constraint_from_ints, push_constraint_ints, Endpoint, Payload, Tag, CONSTRAINT_INTS,
};
use crate::common::{Agent, ConstraintSet, Path};
use crate::grid::{Grid, GridCoord};

/// Request header ints before the constraint rows.
const REQUEST_HEADER: usize = 6;

/// `agent` value that shuts the pool down.
const SHUTDOWN: i64 = -1;

const STATUS_FAILED: i64 = 0;
const STATUS_OK: i64 = 1;

fn encode_request(agent: &Agent, constraints: &ConstraintSet) -> Vec<i64> {
    let mut ints = Vec::with_capacity(REQUEST_HEADER + constraints.len() * CONSTRAINT_INTS);
    ints.extend_from_slice(&[
        agent.id as i64,
        agent.start.x as i64,
        agent.start.y as i64,
        agent.goal.x as i64,
        agent.goal.y as i64,
        constraints.len() as i64,
    ]);
    for constraint in constraints.iter() {
        push_constraint_ints(&mut ints, constraint);
    }
    ints
}

fn decode_request(ints: &[i64]) -> (Agent, ConstraintSet) {
    let agent = Agent {
        id: ints[0] as usize,
        start: GridCoord::new(ints[1] as i32, ints[2] as i32),
        goal: GridCoord::new(ints[3] as i32, ints[4] as i32),
    };
    debug_assert_eq!(
        ints.len(),
        REQUEST_HEADER + ints[5] as usize * CONSTRAINT_INTS
    );
    let constraints = ints[REQUEST_HEADER..]
        .chunks(CONSTRAINT_INTS)
        .map(constraint_from_ints)
        .collect();
    (agent, constraints)
}

/// Client side of the planner pool: ships each replan request to the
/// manager rank and waits for the answer. Interchangeable with the local
/// planners through [`LowLevelPlanner`].
pub struct RemotePlanner<'e> {
    ep: &'e mut Endpoint,
    manager: usize,
}

impl<'e> RemotePlanner<'e> {
    pub fn new(ep: &'e mut Endpoint, manager: usize) -> Self {
        RemotePlanner { ep, manager }
    }
}

impl LowLevelPlanner for RemotePlanner<'_> {
    fn plan_for(&mut self, agent: &Agent, constraints: &ConstraintSet) -> Option<Path> {
        self.ep.post(
            self.manager,
            Tag::LlRequest,
            Payload::Ints(encode_request(agent, constraints)),
        );
        let reply = self
            .ep
            .recv_matching(&[Tag::LlResponse])
            .payload
            .into_ints();
        if reply[0] == STATUS_FAILED {
            return None;
        }
        let len = reply[1] as usize;
        debug_assert_eq!(reply.len(), 2 + 2 * len);
        Some(
            reply[2..]
                .chunks(2)
                .map(|pair| GridCoord::new(pair[0] as i32, pair[1] as i32))
                .collect(),
        )
    }
}

/// Asks the manager rank to wind the pool down.
pub fn shutdown_manager(ep: &mut Endpoint, manager: usize) {
    ep.post(manager, Tag::LlRequest, Payload::Ints(vec![SHUTDOWN]));
}

/// Front rank of the planner pool. Serves one request at a time: decodes
/// it, re-broadcasts it so the pool members spin up as expanders, runs
/// the pooled A* across them, and replies to the requesting rank.
pub fn run_manager_rank(grid: &Grid, mut ep: Endpoint, members: Vec<usize>, horizon: usize) -> f64 {
    loop {
        let msg = ep.recv_matching(&[Tag::LlRequest]);
        let ints = msg.payload.into_ints();
        if ints[0] == SHUTDOWN {
            debug!("planner pool shutting down");
            for &member in &members {
                ep.post(member, Tag::LlRequest, Payload::Ints(vec![SHUTDOWN]));
            }
            return ep.comm_seconds();
        }

        let (agent, constraints) = decode_request(&ints);
        for &member in &members {
            ep.post(member, Tag::LlRequest, Payload::Ints(ints.clone()));
        }

        let path = {
            let mut planner =
                PooledAStar::new(grid, &mut ep, members.clone()).with_horizon(horizon);
            planner.plan_for(&agent, &constraints)
        };

        let reply = match path {
            Some(path) => {
                let mut ints = Vec::with_capacity(2 + 2 * path.len());
                ints.extend_from_slice(&[STATUS_OK, path.len() as i64]);
                for step in &path {
                    ints.extend_from_slice(&[step.x as i64, step.y as i64]);
                }
                ints
            }
            None => vec![STATUS_FAILED, 0],
        };
        ep.post(msg.src, Tag::LlResponse, Payload::Ints(reply));
    }
}

/// Non-front pool rank: waits for the manager's request broadcast, serves
/// the matching search as an expander, repeats until shutdown.
pub fn run_manager_pool_member(grid: &Grid, mut ep: Endpoint) -> f64 {
    loop {
        let msg = ep.recv_matching(&[Tag::LlRequest]);
        if msg.payload.into_ints()[0] == SHUTDOWN {
            return ep.comm_seconds();
        }
        run_expander(grid, &mut ep);
    }
}
