use crate::grid::GridCoord;

/// Agent id that makes a constraint apply to every agent.
pub const ANY_AGENT: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstraintKind {
    /// Forbids occupying `at` at the constraint's time step.
    Vertex { at: GridCoord },
    /// Forbids departing `from` at the constraint's time step towards `to`.
    Edge { from: GridCoord, to: GridCoord },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Constraint {
    /// Target agent, or [`ANY_AGENT`] for a universal constraint.
    pub agent: i32,
    pub time: usize,
    pub kind: ConstraintKind,
}

impl Constraint {
    pub fn vertex(agent: i32, time: usize, at: GridCoord) -> Self {
        Constraint {
            agent,
            time,
            kind: ConstraintKind::Vertex { at },
        }
    }

    pub fn edge(agent: i32, time: usize, from: GridCoord, to: GridCoord) -> Self {
        Constraint {
            agent,
            time,
            kind: ConstraintKind::Edge { from, to },
        }
    }

    pub fn applies_to(&self, agent: usize) -> bool {
        self.agent == ANY_AGENT || self.agent == agent as i32
    }

    /// Whether the transition `from` at `depart_time` to `to` at
    /// `depart_time + 1` violates this constraint. Vertex constraints hit
    /// the arrival cell at the arrival time; edge constraints hit the
    /// departure.
    pub fn blocks(&self, from: GridCoord, to: GridCoord, depart_time: usize) -> bool {
        match self.kind {
            ConstraintKind::Vertex { at } => self.time == depart_time + 1 && at == to,
            ConstraintKind::Edge { from: cf, to: ct } => {
                self.time == depart_time && cf == from && ct == to
            }
        }
    }
}

/// Append-only bag of constraints. Cardinality per CBS node is in the
/// order of the node's depth, so lookups are linear scans and duplicates
/// are tolerated; filtering by agent happens at use time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintSet {
    items: Vec<Constraint>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, constraint: Constraint) {
        self.items.push(constraint);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.items.iter()
    }

    pub fn blocks_move(
        &self,
        agent: usize,
        from: GridCoord,
        to: GridCoord,
        depart_time: usize,
    ) -> bool {
        self.items
            .iter()
            .any(|c| c.applies_to(agent) && c.blocks(from, to, depart_time))
    }

    /// Whether `path` violates any constraint applying to `agent`,
    /// including vertex constraints on the final cell after the path ends
    /// (the agent is considered parked there).
    pub fn violated_by(&self, agent: usize, path: &[GridCoord]) -> bool {
        if path
            .windows(2)
            .enumerate()
            .any(|(t, step)| self.blocks_move(agent, step[0], step[1], t))
        {
            return true;
        }
        let Some(&end) = path.last() else { return false };
        let parked_from = path.len() - 1;
        self.items.iter().any(|c| {
            c.applies_to(agent)
                && c.time > parked_from
                && matches!(c.kind, ConstraintKind::Vertex { at } if at == end)
        })
    }

    /// Latest time a vertex constraint applying to `agent` pins `cell`.
    /// The planner must not finish on `cell` before this, or the wait-at-
    /// goal extension would sit the agent inside a forbidden state.
    pub fn goal_hold(&self, agent: usize, cell: GridCoord) -> Option<usize> {
        self.items
            .iter()
            .filter(|c| {
                c.applies_to(agent)
                    && matches!(c.kind, ConstraintKind::Vertex { at } if at == cell)
            })
            .map(|c| c.time)
            .max()
    }
}

impl FromIterator<Constraint> for ConstraintSet {
    fn from_iter<I: IntoIterator<Item = Constraint>>(iter: I) -> Self {
        ConstraintSet {
            items: iter.into_iter().collect(),
        }
    }
}
