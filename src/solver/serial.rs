use tracing::{debug, error};

use super::{Deadline, Solver};
use crate::algorithm::GridPlanner;
use crate::common::{HighLevelNode, MinHeap, ProblemInstance, Solution};
use crate::config::Config;
use crate::stat::SearchStats;

/// Single-rank best-first CBS, the baseline the distributed drivers are
/// measured against.
pub struct SerialCbs {
    instance: ProblemInstance,
    stats: SearchStats,
}

impl SerialCbs {
    pub fn new(instance: ProblemInstance) -> Self {
        SerialCbs {
            instance,
            stats: SearchStats::default(),
        }
    }
}

impl Solver for SerialCbs {
    fn solve(&mut self, config: &Config) -> Option<Solution> {
        if let Err(err) = config.validate() {
            error!("invalid configuration: {err:#}");
            return None;
        }
        let deadline = Deadline::new(config.timeout_seconds);
        self.stats = SearchStats::default();

        let mut planner = match config.horizon {
            Some(horizon) => GridPlanner::with_horizon(&self.instance.grid, horizon),
            None => GridPlanner::new(&self.instance.grid),
        };

        let mut open: MinHeap<HighLevelNode> = MinHeap::new();
        let mut next_id: u64 = 0;

        match HighLevelNode::root(&self.instance, &mut planner) {
            Some(root) => {
                self.stats.nodes_generated += 1;
                open.push(root.cost as f64, root);
            }
            None => {
                debug!("instance unsolvable at the root");
                self.stats.finish(deadline.elapsed_sec(), &[]);
                return None;
            }
        }

        let solution = loop {
            if deadline.expired() || self.stats.nodes_expanded >= config.max_nodes_expanded {
                self.stats.timed_out = true;
                break None;
            }

            let Some((_, node)) = open.pop() else {
                // Every branch died replanning: no solution exists.
                break None;
            };
            self.stats.nodes_expanded += 1;
            debug!(id = node.id, cost = node.cost, "expand high-level node");

            let Some(conflict) = node.first_conflict() else {
                debug!(cost = node.cost, "conflict-free node, done");
                self.stats.record_solution(node.cost);
                break Some(Solution {
                    cost: node.cost,
                    paths: node.paths,
                });
            };
            self.stats.conflicts_detected += 1;
            debug!(?conflict, "split");

            for constraint in conflict.branch_constraints() {
                if let Some(mut child) = node.child(&self.instance, constraint, &mut planner) {
                    next_id += 1;
                    child.id = next_id;
                    self.stats.nodes_generated += 1;
                    open.push(child.cost as f64, child);
                }
            }
        };

        self.stats.finish(deadline.elapsed_sec(), &[]);
        solution
    }

    fn stats(&self) -> &SearchStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Grid, GridCoord};

    fn at(x: i32, y: i32) -> GridCoord {
        GridCoord::new(x, y)
    }

    #[test]
    fn test_single_agent() {
        let instance =
            ProblemInstance::from_parts(Grid::new(4, 1), &[at(0, 0)], &[at(3, 0)]).unwrap();
        let mut solver = SerialCbs::new(instance);
        let solution = solver.solve(&Config::default()).unwrap();
        assert_eq!(solution.cost, 4);
        assert_eq!(solver.stats().nodes_expanded, 1);
    }

    #[test]
    fn test_start_equals_goal() {
        let instance =
            ProblemInstance::from_parts(Grid::new(2, 2), &[at(1, 1)], &[at(1, 1)]).unwrap();
        let mut solver = SerialCbs::new(instance);
        let solution = solver.solve(&Config::default()).unwrap();
        assert_eq!(solution.cost, 1);
        assert_eq!(solution.paths[0], vec![at(1, 1)]);
    }

    #[test]
    fn test_vertex_dispute_costs_one_wait() {
        let instance = ProblemInstance::from_parts(
            Grid::new(3, 3),
            &[at(0, 1), at(1, 0)],
            &[at(2, 1), at(1, 2)],
        )
        .unwrap();
        let mut solver = SerialCbs::new(instance);
        let solution = solver.solve(&Config::default()).unwrap();
        assert_eq!(solution.cost, 7);
        assert!(solver.stats().conflicts_detected >= 1);
    }

    #[test]
    fn test_walled_off_agent_is_unsolvable() {
        let mut grid = Grid::new(5, 1);
        grid.set_obstacle(2, 0);
        let instance =
            ProblemInstance::from_parts(grid, &[at(0, 0), at(3, 0)], &[at(1, 0), at(4, 0)])
                .unwrap();
        let mut solver = SerialCbs::new(instance);
        assert!(solver.solve(&Config::default()).is_none());
        assert!(!solver.stats().timed_out);
        assert_eq!(solver.stats().best_cost, -1.0);
    }

    #[test]
    fn test_expansion_budget_reports_timeout() {
        // Head-on corridor swap: unsolvable, so the budget trips first.
        let instance = ProblemInstance::from_parts(
            Grid::new(5, 1),
            &[at(0, 0), at(4, 0)],
            &[at(4, 0), at(0, 0)],
        )
        .unwrap();
        let mut solver = SerialCbs::new(instance);
        let config = Config {
            max_nodes_expanded: 200,
            horizon: Some(64),
            ..Config::default()
        };
        assert!(solver.solve(&config).is_none());
        assert!(solver.stats().timed_out);
        assert_eq!(solver.stats().nodes_expanded, 200);
    }
}
