use tracing::{debug, trace};

use super::{default_horizon, LowLevelPlanner};
use crate::common::{Agent, ConstraintSet, MinHeap, Path};
use crate::grid::{Grid, GridCoord, MOVES};

pub(crate) const NO_PARENT: u32 = u32::MAX;

/// One space-time search state in the arena. Nodes link to their parents
/// through indices, never through owning pointers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AStarNode {
    pub(crate) pos: GridCoord,
    pub(crate) t: u32,
    pub(crate) g: u32,
    pub(crate) parent: u32,
}

/// Dense best-g table over (t, y, x), the closed set of the search. A
/// successor only survives if it strictly improves the stored cost.
pub(crate) struct BestG {
    table: Vec<u32>,
    width: usize,
    height: usize,
}

impl BestG {
    pub(crate) fn new(grid: &Grid, horizon: usize) -> Self {
        BestG {
            table: vec![u32::MAX; horizon * grid.cell_count()],
            width: grid.width(),
            height: grid.height(),
        }
    }

    fn index(&self, pos: GridCoord, t: u32) -> usize {
        (t as usize * self.height + pos.y as usize) * self.width + pos.x as usize
    }

    /// Records `g` for the state if it strictly improves the stored value.
    pub(crate) fn improve(&mut self, pos: GridCoord, t: u32, g: u32) -> bool {
        let idx = self.index(pos, t);
        if g < self.table[idx] {
            self.table[idx] = g;
            true
        } else {
            false
        }
    }

    pub(crate) fn get(&self, pos: GridCoord, t: u32) -> u32 {
        self.table[self.index(pos, t)]
    }
}

/// Whether the transition from `from` at time `t` to `to` at `t + 1` is
/// legal for `agent`. Waiting is never obstacle-checked: the planner is
/// only invoked on legal start cells, so a wait can only ever sit on a
/// free cell that is in bounds.
pub(crate) fn transition_valid(
    grid: &Grid,
    agent: usize,
    constraints: &ConstraintSet,
    from: GridCoord,
    to: GridCoord,
    t: u32,
) -> bool {
    if !grid.in_bounds(to.x, to.y) {
        return false;
    }
    if to != from && grid.is_obstacle(to.x, to.y) {
        return false;
    }
    !constraints.blocks_move(agent, from, to, t as usize)
}

/// Constrained space-time A* from `start` to `goal` for one agent.
///
/// States are (x, y, t); actions are the four cardinal moves plus wait,
/// each of unit cost. The heuristic is Manhattan distance, admissible and
/// consistent for this action set, so the first goal pop is optimal.
/// States at `t >= horizon` are dropped; when the goal is unreachable
/// within the horizon the search reports failure.
pub fn a_star_search(
    grid: &Grid,
    agent: usize,
    start: GridCoord,
    goal: GridCoord,
    constraints: &ConstraintSet,
    horizon: usize,
) -> Option<Path> {
    let mut arena: Vec<AStarNode> = Vec::new();
    let mut open: MinHeap<u32> = MinHeap::new();
    let mut best_g = BestG::new(grid, horizon);
    let state_budget = horizon * grid.cell_count();
    // Finishing earlier would park the agent inside a later vertex
    // constraint on the goal cell.
    let goal_hold = constraints.goal_hold(agent, goal);

    best_g.improve(start, 0, 0);
    arena.push(AStarNode {
        pos: start,
        t: 0,
        g: 0,
        parent: NO_PARENT,
    });
    open.push(start.manhattan(goal) as f64, 0);

    while let Some((_, idx)) = open.pop() {
        let current = arena[idx as usize];
        if current.g > best_g.get(current.pos, current.t) {
            // Superseded by a cheaper arrival at the same state.
            continue;
        }
        trace!(?current, "expand low-level node");

        if current.pos == goal && goal_hold.is_none_or(|hold| current.t as usize > hold) {
            return Some(reconstruct(&arena, idx));
        }

        let arrive = current.t + 1;
        if (arrive as usize) < horizon {
            for &(dx, dy) in &MOVES {
                let to = GridCoord::new(current.pos.x + dx, current.pos.y + dy);
                if !transition_valid(grid, agent, constraints, current.pos, to, current.t) {
                    continue;
                }
                let g = current.g + 1;
                if !best_g.improve(to, arrive, g) {
                    continue;
                }
                let child = arena.len() as u32;
                arena.push(AStarNode {
                    pos: to,
                    t: arrive,
                    g,
                    parent: idx,
                });
                open.push((g as usize + to.manhattan(goal)) as f64, child);
            }
        }

        if open.len() > state_budget {
            debug!(agent, "low-level open set exceeded {state_budget} states");
            return None;
        }
    }

    debug!(agent, ?start, ?goal, "low-level search exhausted");
    None
}

/// Walks parent indices back from the goal node; the path has length
/// `goal_node.t + 1`.
pub(crate) fn reconstruct(arena: &[AStarNode], goal_idx: u32) -> Path {
    let mut path = Vec::with_capacity(arena[goal_idx as usize].t as usize + 1);
    let mut idx = goal_idx;
    loop {
        let node = arena[idx as usize];
        path.push(node.pos);
        if node.parent == NO_PARENT {
            break;
        }
        idx = node.parent;
    }
    path.reverse();
    path
}

/// Sequential planner over a borrowed grid.
pub struct GridPlanner<'a> {
    grid: &'a Grid,
    horizon: usize,
}

impl<'a> GridPlanner<'a> {
    pub fn new(grid: &'a Grid) -> Self {
        GridPlanner {
            grid,
            horizon: default_horizon(grid),
        }
    }

    pub fn with_horizon(grid: &'a Grid, horizon: usize) -> Self {
        GridPlanner { grid, horizon }
    }
}

impl LowLevelPlanner for GridPlanner<'_> {
    fn plan_for(&mut self, agent: &Agent, constraints: &ConstraintSet) -> Option<Path> {
        a_star_search(
            self.grid,
            agent.id,
            agent.start,
            agent.goal,
            constraints,
            self.horizon,
        )
    }
}
