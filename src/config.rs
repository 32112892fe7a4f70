use anyhow::{bail, Result};

/// Driver configuration. One struct serves all three drivers; each field
/// documents which driver reads it.
#[derive(Debug, Clone)]
pub struct Config {
    /// Wall-clock budget in seconds; 0 disables the timeout.
    pub timeout_seconds: f64,
    /// Centralised: number of expansion worker ranks. Defaults to every
    /// rank that is neither the coordinator nor part of the planner pool.
    pub expanders: Option<usize>,
    /// Centralised: ranks reserved for the shared low-level planner pool.
    pub low_level_pool: usize,
    /// Decentralised: suboptimality factor `w >= 1`; the reported cost is
    /// within `w` of optimal.
    pub suboptimality: f64,
    /// Serial: expansion budget, reported as a timeout when exhausted.
    pub max_nodes_expanded: u64,
    /// Low-level horizon override; defaults to `max(MAX_PATH_LENGTH, 4*W*H)`.
    pub horizon: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            timeout_seconds: 0.0,
            expanders: None,
            low_level_pool: 0,
            suboptimality: 1.0,
            max_nodes_expanded: 20_000,
            horizon: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_seconds < 0.0 {
            bail!("timeout_seconds must be >= 0, got {}", self.timeout_seconds);
        }
        if self.suboptimality < 1.0 {
            bail!("suboptimality factor must be >= 1.0, got {}", self.suboptimality);
        }
        if let Some(expanders) = self.expanders {
            if expanders == 0 {
                bail!("centralised search needs at least one expansion worker");
            }
        }
        if self.max_nodes_expanded == 0 {
            bail!("max_nodes_expanded must be positive");
        }
        if let Some(horizon) = self.horizon {
            if horizon == 0 {
                bail!("horizon must be positive");
            }
        }
        Ok(())
    }
}
