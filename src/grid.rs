use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::MAX_NEIGHBORS;

/// A cell coordinate. `x` runs along the width axis, `y` along the height
/// axis; coordinates outside the grid are legal values and simply map to
/// obstacle cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: i32,
    pub y: i32,
}

impl GridCoord {
    pub fn new(x: i32, y: i32) -> Self {
        GridCoord { x, y }
    }

    pub fn manhattan(&self, other: GridCoord) -> usize {
        ((self.x - other.x).unsigned_abs() + (self.y - other.y).unsigned_abs()) as usize
    }
}

/// Unit actions available each time step: up, down, left, right, wait.
/// The wait action is the all-zero entry and must stay last; the planner
/// skips the obstacle check for it.
pub const MOVES: [(i32, i32); MAX_NEIGHBORS] = [(0, -1), (0, 1), (-1, 0), (1, 0), (0, 0)];

/// Immutable obstacle map. Cells are stored row-major, one byte per cell,
/// zero meaning free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    width: i32,
    height: i32,
    cells: Vec<u8>,
}

impl Grid {
    /// An all-free grid.
    pub fn new(width: usize, height: usize) -> Self {
        Grid {
            width: width as i32,
            height: height as i32,
            cells: vec![0; width * height],
        }
    }

    pub fn with_obstacles(width: usize, height: usize, cells: Vec<u8>) -> Result<Self> {
        if cells.len() != width * height {
            bail!(
                "obstacle bitmap has {} cells, expected {}",
                cells.len(),
                width * height
            );
        }
        Ok(Grid {
            width: width as i32,
            height: height as i32,
            cells,
        })
    }

    /// Parses the ASCII fixture format: a `W H` line followed by W*H
    /// characters in {'0', '1'}, row-major, whitespace ignored.
    pub fn from_ascii(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let header = lines.next().context("empty map text")?;
        let mut dims = header.split_whitespace();
        let width: usize = dims
            .next()
            .context("missing width")?
            .parse()
            .context("bad width")?;
        let height: usize = dims
            .next()
            .context("missing height")?
            .parse()
            .context("bad height")?;

        let mut cells = Vec::with_capacity(width * height);
        for ch in lines.flat_map(|line| line.chars()) {
            match ch {
                '0' => cells.push(0),
                '1' => cells.push(1),
                c if c.is_whitespace() => {}
                c => bail!("unexpected map character {c:?}"),
            }
        }
        Self::with_obstacles(width, height, cells)
    }

    pub fn width(&self) -> usize {
        self.width as usize
    }

    pub fn height(&self) -> usize {
        self.height as usize
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    /// Out-of-bounds cells count as obstacles.
    pub fn is_obstacle(&self, x: i32, y: i32) -> bool {
        if !self.in_bounds(x, y) {
            return true;
        }
        self.cells[(y * self.width + x) as usize] != 0
    }

    pub fn is_free(&self, at: GridCoord) -> bool {
        !self.is_obstacle(at.x, at.y)
    }

    /// Marks a cell as blocked. Only meaningful before a search starts;
    /// the solvers treat the grid as immutable.
    pub fn set_obstacle(&mut self, x: i32, y: i32) {
        assert!(self.in_bounds(x, y), "obstacle ({x}, {y}) out of bounds");
        self.cells[(y * self.width + x) as usize] = 1;
    }
}
