use anyhow::Result;
use serde::Serialize;

/// Search statistics emitted by every driver. `best_cost` is −1 when no
/// solution was found; `compute_time_sec` is the runtime minus the mean
/// communication time across ranks (zero for the serial driver).
#[derive(Debug, Clone, Serialize)]
pub struct SearchStats {
    pub nodes_expanded: u64,
    pub nodes_generated: u64,
    pub conflicts_detected: u64,
    pub best_cost: f64,
    pub solution_found: bool,
    pub timed_out: bool,
    pub runtime_sec: f64,
    pub comm_time_sec: f64,
    pub compute_time_sec: f64,
}

impl Default for SearchStats {
    fn default() -> Self {
        SearchStats {
            nodes_expanded: 0,
            nodes_generated: 0,
            conflicts_detected: 0,
            best_cost: -1.0,
            solution_found: false,
            timed_out: false,
            runtime_sec: 0.0,
            comm_time_sec: 0.0,
            compute_time_sec: 0.0,
        }
    }
}

impl SearchStats {
    /// Fixes up the derived fields once a run finishes. `comm_seconds`
    /// holds one entry per rank.
    pub fn finish(&mut self, runtime_sec: f64, comm_seconds: &[f64]) {
        self.runtime_sec = runtime_sec;
        self.comm_time_sec = if comm_seconds.is_empty() {
            0.0
        } else {
            comm_seconds.iter().sum::<f64>() / comm_seconds.len() as f64
        };
        self.compute_time_sec = (runtime_sec - self.comm_time_sec).max(0.0);
    }

    pub fn record_solution(&mut self, cost: usize) {
        self.best_cost = cost as f64;
        self.solution_found = true;
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_report_no_solution() {
        let stats = SearchStats::default();
        assert_eq!(stats.best_cost, -1.0);
        assert!(!stats.solution_found);
        assert!(!stats.timed_out);
    }

    #[test]
    fn test_finish_splits_runtime() {
        let mut stats = SearchStats::default();
        stats.finish(2.0, &[0.5, 1.5]);
        assert_eq!(stats.comm_time_sec, 1.0);
        assert_eq!(stats.compute_time_sec, 1.0);
    }

    #[test]
    fn test_json_has_all_fields() {
        let mut stats = SearchStats::default();
        stats.record_solution(12);
        let json = stats.to_json().unwrap();
        assert!(json.contains("\"best_cost\":12.0"));
        assert!(json.contains("\"solution_found\":true"));
        assert!(json.contains("\"nodes_expanded\":0"));
    }
}
