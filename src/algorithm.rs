mod astar;
mod parallel;

pub use astar::{a_star_search, GridPlanner};
pub use parallel::{run_expander, PooledAStar};

use crate::common::{Agent, ConstraintSet, Path};
use crate::grid::Grid;
use crate::MAX_PATH_LENGTH;

/// The contract shared by every low-level planner: produce a path for one
/// agent that respects every constraint applying to it, or report failure.
/// The high-level drivers only ever talk to this trait, so the sequential
/// planner, the pooled parallel planner and the remote manager client are
/// interchangeable.
pub trait LowLevelPlanner {
    fn plan_for(&mut self, agent: &Agent, constraints: &ConstraintSet) -> Option<Path>;
}

/// Time horizon after which the planner gives up on a state. The floor of
/// `4 * W * H` covers instances whose constraint sets force long detours
/// on large maps.
pub fn default_horizon(grid: &Grid) -> usize {
    MAX_PATH_LENGTH.max(4 * grid.cell_count())
}
