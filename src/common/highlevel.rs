use tracing::debug;

use crate::algorithm::LowLevelPlanner;
use crate::common::{position_at, sum_of_costs, Constraint, ConstraintSet, Path, ProblemInstance};
use crate::grid::GridCoord;

/// `parent` value of a root node.
pub const ROOT_PARENT: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// Both agents occupy `at` at the conflict time.
    Vertex { at: GridCoord },
    /// The agents swap cells between the conflict time and the next step;
    /// `a_from -> a_to` is agent `a`'s move, agent `b` takes the reverse.
    Edge { a_from: GridCoord, a_to: GridCoord },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Conflict {
    pub a: usize,
    pub b: usize,
    pub time: usize,
    pub kind: ConflictKind,
}

impl Conflict {
    /// The two constraints that split this conflict; element 0 targets
    /// agent `a`, element 1 targets agent `b`. Each forbids that agent's
    /// own offending cell or move.
    pub fn branch_constraints(&self) -> [Constraint; 2] {
        match self.kind {
            ConflictKind::Vertex { at } => [
                Constraint::vertex(self.a as i32, self.time, at),
                Constraint::vertex(self.b as i32, self.time, at),
            ],
            ConflictKind::Edge { a_from, a_to } => [
                Constraint::edge(self.a as i32, self.time, a_from, a_to),
                Constraint::edge(self.b as i32, self.time, a_to, a_from),
            ],
        }
    }
}

/// A node of the CBS constraint tree: a constraint set plus one path per
/// agent consistent with it. Children copy the parent and append exactly
/// one constraint; nodes record their parent by id only, the tree is a
/// logical shape rather than an ownership graph.
#[derive(Debug, Clone)]
pub struct HighLevelNode {
    pub id: u64,
    pub parent: i64,
    pub depth: u32,
    /// Sum-of-costs over `paths`.
    pub cost: usize,
    pub constraints: ConstraintSet,
    pub paths: Vec<Path>,
}

impl HighLevelNode {
    /// Plans every agent under the empty constraint set. `None` means some
    /// agent has no path at all and the instance is unsolvable.
    pub fn root(
        instance: &ProblemInstance,
        planner: &mut dyn LowLevelPlanner,
    ) -> Option<HighLevelNode> {
        let constraints = ConstraintSet::new();
        let mut paths = Vec::with_capacity(instance.num_agents());
        for agent in &instance.agents {
            match planner.plan_for(agent, &constraints) {
                Some(path) => paths.push(path),
                None => {
                    debug!(agent = agent.id, "agent has no unconstrained path");
                    return None;
                }
            }
        }
        let cost = sum_of_costs(&paths);
        Some(HighLevelNode {
            id: 0,
            parent: ROOT_PARENT,
            depth: 0,
            cost,
            constraints,
            paths,
        })
    }

    pub fn recompute_cost(&mut self) {
        self.cost = sum_of_costs(&self.paths);
    }

    /// First conflict on the shared time axis: time ascending, then agent
    /// pairs in index order, vertex before edge. Scanning stops at the
    /// first hit so every driver sees the same deterministic split point.
    pub fn first_conflict(&self) -> Option<Conflict> {
        let t_max = self.paths.iter().map(|path| path.len()).max()?;
        for t in 0..t_max {
            for a in 0..self.paths.len() {
                for b in a + 1..self.paths.len() {
                    let pa = position_at(&self.paths[a], t);
                    let pb = position_at(&self.paths[b], t);
                    if pa == pb {
                        return Some(Conflict {
                            a,
                            b,
                            time: t,
                            kind: ConflictKind::Vertex { at: pa },
                        });
                    }
                    let pa_next = position_at(&self.paths[a], t + 1);
                    let pb_next = position_at(&self.paths[b], t + 1);
                    if pa == pb_next && pb == pa_next {
                        return Some(Conflict {
                            a,
                            b,
                            time: t,
                            kind: ConflictKind::Edge {
                                a_from: pa,
                                a_to: pa_next,
                            },
                        });
                    }
                }
            }
        }
        None
    }

    /// Deep-copies this node, appends `constraint`, and replans the
    /// constrained agent. `None` means the agent has no path under the
    /// extended set and the child is discarded. The child's id is left at
    /// zero; the driver that enqueues it assigns one.
    pub fn child(
        &self,
        instance: &ProblemInstance,
        constraint: Constraint,
        planner: &mut dyn LowLevelPlanner,
    ) -> Option<HighLevelNode> {
        debug_assert!(constraint.agent >= 0, "branch constraints target one agent");
        let agent = constraint.agent as usize;

        let mut constraints = self.constraints.clone();
        constraints.push(constraint);

        let path = planner.plan_for(&instance.agents[agent], &constraints)?;
        let mut paths = self.paths.clone();
        paths[agent] = path;
        let cost = sum_of_costs(&paths);

        Some(HighLevelNode {
            id: 0,
            parent: self.id as i64,
            depth: self.depth + 1,
            cost,
            constraints,
            paths,
        })
    }

    /// Whether every path respects every constraint applying to its agent.
    /// The search maintains this by construction; tests assert it.
    pub fn satisfies_constraints(&self) -> bool {
        self.paths
            .iter()
            .enumerate()
            .all(|(agent, path)| !self.constraints.violated_by(agent, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::GridPlanner;
    use crate::grid::Grid;

    fn at(x: i32, y: i32) -> GridCoord {
        GridCoord::new(x, y)
    }

    fn crossing_instance() -> ProblemInstance {
        // Agent 0 crosses left to right, agent 1 top to bottom; both want
        // the centre cell at the same step.
        ProblemInstance::from_parts(
            Grid::new(3, 3),
            &[at(0, 1), at(1, 0)],
            &[at(2, 1), at(1, 2)],
        )
        .unwrap()
    }

    #[test]
    fn test_root_plans_every_agent() {
        let instance = crossing_instance();
        let mut planner = GridPlanner::new(&instance.grid);
        let root = HighLevelNode::root(&instance, &mut planner).unwrap();
        assert_eq!(root.paths.len(), 2);
        assert_eq!(root.cost, 6);
        assert_eq!(root.parent, ROOT_PARENT);
    }

    #[test]
    fn test_root_fails_on_walled_off_agent() {
        let mut grid = Grid::new(4, 1);
        grid.set_obstacle(2, 0);
        let instance =
            ProblemInstance::from_parts(grid, &[at(0, 0)], &[at(3, 0)]).unwrap();
        let mut planner = GridPlanner::new(&instance.grid);
        assert!(HighLevelNode::root(&instance, &mut planner).is_none());
    }

    #[test]
    fn test_first_conflict_vertex() {
        let instance = crossing_instance();
        let mut planner = GridPlanner::new(&instance.grid);
        let root = HighLevelNode::root(&instance, &mut planner).unwrap();

        let conflict = root.first_conflict().unwrap();
        assert_eq!(conflict.time, 1);
        assert_eq!((conflict.a, conflict.b), (0, 1));
        assert_eq!(conflict.kind, ConflictKind::Vertex { at: at(1, 1) });
    }

    #[test]
    fn test_first_conflict_edge() {
        let node = HighLevelNode {
            id: 0,
            parent: ROOT_PARENT,
            depth: 0,
            cost: 4,
            constraints: ConstraintSet::new(),
            paths: vec![vec![at(0, 0), at(1, 0)], vec![at(1, 0), at(0, 0)]],
        };
        // The swap at t = 0 is also a vertex overlap at t = 1 under the
        // wait rule, but the edge is reported first.
        let conflict = node.first_conflict().unwrap();
        assert_eq!(conflict.time, 0);
        assert_eq!(
            conflict.kind,
            ConflictKind::Edge {
                a_from: at(0, 0),
                a_to: at(1, 0)
            }
        );
    }

    #[test]
    fn test_conflict_after_short_path_ends() {
        // Agent 0 parks on (1, 0) at t = 1; agent 1 drives through it at
        // t = 2, beyond agent 0's path length.
        let node = HighLevelNode {
            id: 0,
            parent: ROOT_PARENT,
            depth: 0,
            cost: 6,
            constraints: ConstraintSet::new(),
            paths: vec![
                vec![at(0, 0), at(1, 0)],
                vec![at(3, 0), at(2, 0), at(1, 0), at(0, 0)],
            ],
        };
        let conflict = node.first_conflict().unwrap();
        assert_eq!(conflict.time, 2);
        assert_eq!(conflict.kind, ConflictKind::Vertex { at: at(1, 0) });
    }

    #[test]
    fn test_branch_constraints_target_each_agent() {
        let conflict = Conflict {
            a: 0,
            b: 1,
            time: 1,
            kind: ConflictKind::Edge {
                a_from: at(0, 0),
                a_to: at(1, 0),
            },
        };
        let [first, second] = conflict.branch_constraints();
        assert_eq!(first.agent, 0);
        assert_eq!(second.agent, 1);
        assert!(first.blocks(at(0, 0), at(1, 0), 1));
        assert!(second.blocks(at(1, 0), at(0, 0), 1));
    }

    #[test]
    fn test_child_replans_and_satisfies_constraints() {
        let instance = crossing_instance();
        let mut planner = GridPlanner::new(&instance.grid);
        let root = HighLevelNode::root(&instance, &mut planner).unwrap();
        let conflict = root.first_conflict().unwrap();

        for constraint in conflict.branch_constraints() {
            let child = root.child(&instance, constraint, &mut planner).unwrap();
            assert_eq!(child.depth, 1);
            assert_eq!(child.parent, 0);
            assert_eq!(child.constraints.len(), 1);
            assert!(child.satisfies_constraints());
            // One agent pays a single wait step.
            assert_eq!(child.cost, 7);
        }
    }
}
