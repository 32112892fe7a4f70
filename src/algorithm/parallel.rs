use tracing::{debug, trace};

use super::astar::{a_star_search, reconstruct, AStarNode, BestG, NO_PARENT};
use super::{default_horizon, LowLevelPlanner};
use crate::common::{Agent, ConstraintSet, MinHeap, Path};
use crate::comm::{Endpoint, Payload, Tag};
use crate::grid::{Grid, GridCoord, MOVES};

/// Serves one parallel A* search as a stateless expander: receives
/// space-time states, returns their grid-valid successors, exits on
/// `LlTerminate`. Constraint and closed-set filtering stay with the
/// coordinator, which owns the search state.
pub fn run_expander(grid: &Grid, ep: &mut Endpoint) {
    loop {
        let msg = ep.recv_matching(&[Tag::LlTask, Tag::LlTerminate]);
        if msg.tag == Tag::LlTerminate {
            return;
        }
        let src = msg.src;
        let task = msg.payload.into_ints();
        debug_assert_eq!(task.len(), 5, "LL task is (node, x, y, g, t)");
        let from = GridCoord::new(task[1] as i32, task[2] as i32);
        let (g, t) = (task[3], task[4]);

        let mut reply = vec![task[0], 0];
        for &(dx, dy) in &MOVES {
            let to = GridCoord::new(from.x + dx, from.y + dy);
            if !grid.in_bounds(to.x, to.y) {
                continue;
            }
            if to != from && grid.is_obstacle(to.x, to.y) {
                continue;
            }
            reply.extend_from_slice(&[to.x as i64, to.y as i64, g + 1, t + 1]);
            reply[1] += 1;
        }
        ep.post(src, Tag::LlResult, Payload::Ints(reply));
    }
}

/// Space-time A* whose frontier expansion is farmed out to expander
/// ranks. The coordinator keeps the open set, arena and best-g table and
/// applies returned successors in reception order; reordering relative to
/// the serial planner is harmless because the Manhattan heuristic is
/// consistent.
pub struct PooledAStar<'g, 'e> {
    grid: &'g Grid,
    ep: &'e mut Endpoint,
    expanders: Vec<usize>,
    horizon: usize,
}

impl<'g, 'e> PooledAStar<'g, 'e> {
    pub fn new(grid: &'g Grid, ep: &'e mut Endpoint, expanders: Vec<usize>) -> Self {
        let horizon = default_horizon(grid);
        PooledAStar {
            grid,
            ep,
            expanders,
            horizon,
        }
    }

    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    fn terminate_expanders(&mut self) {
        for expander in self.expanders.clone() {
            self.ep.post(expander, Tag::LlTerminate, Payload::Empty);
        }
    }

    fn search(
        &mut self,
        agent: usize,
        start: GridCoord,
        goal: GridCoord,
        constraints: &ConstraintSet,
    ) -> Option<Path> {
        let mut arena: Vec<AStarNode> = Vec::new();
        let mut open: MinHeap<u32> = MinHeap::new();
        let mut best_g = BestG::new(self.grid, self.horizon);
        let state_budget = self.horizon * self.grid.cell_count();
        let goal_hold = constraints.goal_hold(agent, goal);

        best_g.improve(start, 0, 0);
        arena.push(AStarNode {
            pos: start,
            t: 0,
            g: 0,
            parent: NO_PARENT,
        });
        open.push(start.manhattan(goal) as f64, 0);

        loop {
            // Up to one lowest-f live node per expander; the goal test
            // happens on pop, exactly as in the sequential search.
            let mut batch = Vec::new();
            while batch.len() < self.expanders.len() {
                let Some((_, idx)) = open.pop() else { break };
                let node = arena[idx as usize];
                if node.g > best_g.get(node.pos, node.t) {
                    continue;
                }
                if node.pos == goal && goal_hold.is_none_or(|hold| node.t as usize > hold) {
                    self.terminate_expanders();
                    return Some(reconstruct(&arena, idx));
                }
                batch.push(idx);
            }
            if batch.is_empty() {
                debug!(agent, "pooled search exhausted");
                self.terminate_expanders();
                return None;
            }

            for (slot, &idx) in batch.iter().enumerate() {
                let node = arena[idx as usize];
                self.ep.post(
                    self.expanders[slot],
                    Tag::LlTask,
                    Payload::Ints(vec![
                        idx as i64,
                        node.pos.x as i64,
                        node.pos.y as i64,
                        node.g as i64,
                        node.t as i64,
                    ]),
                );
            }

            for _ in 0..batch.len() {
                let reply = self.ep.recv_matching(&[Tag::LlResult]).payload.into_ints();
                let from_idx = reply[0] as u32;
                let count = reply[1] as usize;
                debug_assert_eq!(reply.len(), 2 + 4 * count);
                let from = arena[from_idx as usize];
                trace!(from_idx, count, "apply expander results");

                for successor in reply[2..].chunks(4) {
                    let to = GridCoord::new(successor[0] as i32, successor[1] as i32);
                    let (g, t) = (successor[2] as u32, successor[3] as u32);
                    if t as usize >= self.horizon {
                        continue;
                    }
                    if constraints.blocks_move(agent, from.pos, to, from.t as usize) {
                        continue;
                    }
                    if !best_g.improve(to, t, g) {
                        continue;
                    }
                    let child = arena.len() as u32;
                    arena.push(AStarNode {
                        pos: to,
                        t,
                        g,
                        parent: from_idx,
                    });
                    open.push((g as usize + to.manhattan(goal)) as f64, child);
                }
            }

            if open.len() > state_budget {
                debug!(agent, "pooled open set exceeded {state_budget} states");
                self.terminate_expanders();
                return None;
            }
        }
    }
}

impl LowLevelPlanner for PooledAStar<'_, '_> {
    fn plan_for(&mut self, agent: &Agent, constraints: &ConstraintSet) -> Option<Path> {
        if self.expanders.is_empty() {
            return a_star_search(
                self.grid,
                agent.id,
                agent.start,
                agent.goal,
                constraints,
                self.horizon,
            );
        }
        self.search(agent.id, agent.start, agent.goal, constraints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Constraint;
    use crate::comm::Cluster;

    fn at(x: i32, y: i32) -> GridCoord {
        GridCoord::new(x, y)
    }

    fn pooled_plan(
        grid: &Grid,
        agent: Agent,
        constraints: &ConstraintSet,
        world: usize,
    ) -> Vec<Option<Path>> {
        Cluster::run(world, move |mut ep| {
            if ep.rank() == 0 {
                let expanders = (1..world).collect();
                let mut planner = PooledAStar::new(grid, &mut ep, expanders).with_horizon(64);
                planner.plan_for(&agent, constraints)
            } else {
                run_expander(grid, &mut ep);
                None
            }
        })
    }

    #[test]
    fn test_matches_sequential_cost() {
        let mut grid = Grid::new(4, 4);
        grid.set_obstacle(1, 1);
        grid.set_obstacle(2, 1);
        let agent = Agent {
            id: 0,
            start: at(0, 0),
            goal: at(3, 3),
        };
        let constraints: ConstraintSet =
            [Constraint::vertex(0, 2, at(0, 2))].into_iter().collect();

        let serial = a_star_search(&grid, 0, agent.start, agent.goal, &constraints, 64).unwrap();
        let results = pooled_plan(&grid, agent, &constraints, 3);
        let pooled = results[0].clone().unwrap();

        assert_eq!(pooled.len(), serial.len());
        assert_eq!(pooled.first(), serial.first());
        assert_eq!(pooled.last(), serial.last());
        assert!(!constraints.violated_by(0, &pooled));
    }

    #[test]
    fn test_reports_failure_on_walled_goal() {
        let mut grid = Grid::new(4, 2);
        grid.set_obstacle(2, 0);
        grid.set_obstacle(2, 1);
        let agent = Agent {
            id: 0,
            start: at(0, 0),
            goal: at(3, 0),
        };
        let results = pooled_plan(&grid, agent, &ConstraintSet::new(), 3);
        assert!(results[0].is_none());
    }

    #[test]
    fn test_falls_back_without_expanders() {
        let grid = Grid::new(3, 3);
        let agent = Agent {
            id: 0,
            start: at(0, 0),
            goal: at(2, 2),
        };
        let results = pooled_plan(&grid, agent, &ConstraintSet::new(), 1);
        assert_eq!(results[0].as_ref().unwrap().len(), 5);
    }
}
