mod constraint;
mod highlevel;
mod queue;

pub use constraint::{Constraint, ConstraintKind, ConstraintSet, ANY_AGENT};
pub use highlevel::{Conflict, ConflictKind, HighLevelNode};
pub use queue::MinHeap;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::grid::{Grid, GridCoord};
use crate::MAX_AGENTS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: usize,
    pub start: GridCoord,
    pub goal: GridCoord,
}

/// A time-indexed path: the agent occupies `steps[t]` at step `t`. After
/// the last step the agent is considered to wait at its final cell, but
/// only the conflict detector applies that extension.
pub type Path = Vec<GridCoord>;

/// Position of an agent at time `t` under the wait-at-goal rule.
pub fn position_at(path: &Path, t: usize) -> GridCoord {
    match path.get(t) {
        Some(&at) => at,
        // Paths are never empty: even start == goal yields one step.
        None => *path.last().unwrap(),
    }
}

/// Sum-of-costs: each agent contributes its path length.
pub fn sum_of_costs(paths: &[Path]) -> usize {
    paths.iter().map(|path| path.len()).sum()
}

#[derive(Debug, Clone, Serialize)]
pub struct Solution {
    pub cost: usize,
    pub paths: Vec<Path>,
}

/// A preloaded problem: the grid plus one start/goal pair per agent.
/// Constructed once and read-only for the lifetime of a search.
#[derive(Debug, Clone)]
pub struct ProblemInstance {
    pub grid: Grid,
    pub agents: Vec<Agent>,
}

impl ProblemInstance {
    pub fn from_parts(grid: Grid, starts: &[GridCoord], goals: &[GridCoord]) -> Result<Self> {
        if starts.len() != goals.len() {
            bail!("{} starts but {} goals", starts.len(), goals.len());
        }
        let agents = starts
            .iter()
            .zip(goals)
            .enumerate()
            .map(|(id, (&start, &goal))| Agent { id, start, goal })
            .collect();
        let instance = ProblemInstance { grid, agents };
        instance.validate()?;
        Ok(instance)
    }

    /// Parses the scenario fixture format: the agent count, then one
    /// `sx sy gx gy` line per agent.
    pub fn from_scenario(grid: Grid, text: &str) -> Result<Self> {
        let mut numbers = text.split_whitespace().map(|tok| {
            tok.parse::<i32>()
                .with_context(|| format!("bad scenario token {tok:?}"))
        });
        let count = numbers.next().context("missing agent count")??;
        if count < 0 {
            bail!("negative agent count {count}");
        }
        let count = count as usize;

        let mut fields = Vec::with_capacity(count * 4);
        for value in numbers {
            fields.push(value?);
        }
        if fields.len() != count * 4 {
            bail!("expected {} scenario fields, found {}", count * 4, fields.len());
        }

        let starts: Vec<_> = fields
            .chunks(4)
            .map(|row| GridCoord::new(row[0], row[1]))
            .collect();
        let goals: Vec<_> = fields
            .chunks(4)
            .map(|row| GridCoord::new(row[2], row[3]))
            .collect();
        Self::from_parts(grid, &starts, &goals)
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.agents.len() > MAX_AGENTS {
            bail!("{} agents exceeds MAX_AGENTS = {MAX_AGENTS}", self.agents.len());
        }
        for agent in &self.agents {
            if !self.grid.is_free(agent.start) {
                bail!("agent {} starts on a blocked cell {:?}", agent.id, agent.start);
            }
            if !self.grid.is_free(agent.goal) {
                bail!("agent {} has a blocked goal {:?}", agent.id, agent.goal);
            }
        }
        for other in &self.agents {
            for agent in &self.agents[other.id + 1..] {
                if agent.start == other.start {
                    bail!("agents {} and {} share start {:?}", other.id, agent.id, agent.start);
                }
                if agent.goal == other.goal {
                    bail!("agents {} and {} share goal {:?}", other.id, agent.id, agent.goal);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(pairs: &[(i32, i32)]) -> Vec<GridCoord> {
        pairs.iter().map(|&(x, y)| GridCoord::new(x, y)).collect()
    }

    #[test]
    fn test_position_at_waits_at_goal() {
        let path = coords(&[(0, 0), (1, 0), (2, 0)]);
        assert_eq!(position_at(&path, 0), GridCoord::new(0, 0));
        assert_eq!(position_at(&path, 2), GridCoord::new(2, 0));
        assert_eq!(position_at(&path, 17), GridCoord::new(2, 0));
    }

    #[test]
    fn test_sum_of_costs() {
        let paths = vec![coords(&[(0, 0), (1, 0)]), coords(&[(2, 2)])];
        assert_eq!(sum_of_costs(&paths), 3);
    }

    #[test]
    fn test_from_scenario() {
        let grid = Grid::new(4, 4);
        let instance = ProblemInstance::from_scenario(grid, "2\n0 0 3 0\n0 3 3 3\n").unwrap();
        assert_eq!(instance.num_agents(), 2);
        assert_eq!(instance.agents[1].start, GridCoord::new(0, 3));
        assert_eq!(instance.agents[1].goal, GridCoord::new(3, 3));
    }

    #[test]
    fn test_from_scenario_rejects_truncation() {
        let grid = Grid::new(4, 4);
        assert!(ProblemInstance::from_scenario(grid, "2\n0 0 3 0\n0 3\n").is_err());
    }

    #[test]
    fn test_validate_rejects_blocked_start() {
        let mut grid = Grid::new(3, 3);
        grid.set_obstacle(0, 0);
        let starts = coords(&[(0, 0)]);
        let goals = coords(&[(2, 2)]);
        assert!(ProblemInstance::from_parts(grid, &starts, &goals).is_err());
    }

    #[test]
    fn test_validate_rejects_shared_goal() {
        let grid = Grid::new(3, 3);
        let starts = coords(&[(0, 0), (2, 0)]);
        let goals = coords(&[(1, 1), (1, 1)]);
        assert!(ProblemInstance::from_parts(grid, &starts, &goals).is_err());
    }
}
