//! Conflict-Based Search (CBS) for multi-agent path finding on 4-connected
//! grids, with three interchangeable high-level drivers:
//!
//! - [`solver::SerialCbs`]: single-rank best-first CBS;
//! - [`solver::CentralisedCbs`]: a coordinator rank dispatching plateau
//!   batches to expansion workers, optionally backed by a low-level
//!   planner pool;
//! - [`solver::DecentralisedCbs`]: symmetric peers with round-robin node
//!   hand-off, global lower-bound synchronisation and a bounded
//!   suboptimality gate.
//!
//! All drivers share the constrained space-time A* low-level planner in
//! [`algorithm`] and the message layer in [`comm`]. The crate performs no
//! file I/O of its own; it consumes a preloaded [`common::ProblemInstance`]
//! and emits a [`stat::SearchStats`] record plus an optional
//! [`common::Solution`].

pub mod algorithm;
pub mod comm;
pub mod common;
pub mod config;
pub mod grid;
pub mod solver;
pub mod stat;

pub use common::{Agent, Path, ProblemInstance, Solution};
pub use config::Config;
pub use grid::{Grid, GridCoord};
pub use solver::{CentralisedCbs, DecentralisedCbs, SerialCbs, Solver};
pub use stat::SearchStats;

/// Upper bound on the number of agents per instance.
pub const MAX_AGENTS: usize = 40;

/// Baseline horizon of the low-level planner; the effective horizon is
/// `max(MAX_PATH_LENGTH, 4 * W * H)`.
pub const MAX_PATH_LENGTH: usize = 4096;

/// A space-time state has at most four move successors plus a wait.
pub const MAX_NEIGHBORS: usize = 5;

/// Tolerance under which two node costs count as equal. Sum-of-costs is
/// integer-valued on this grid domain, so the tolerance only absorbs
/// float round-trips through the wire format.
pub const COST_EPSILON: f64 = 1e-6;
