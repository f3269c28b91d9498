//! Per-run statistics

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome of one successful queue drain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Items handed to the coordinator
    pub total: usize,
    /// Items assigned to a session
    pub dispatched: usize,
    /// Items whose download finished (including adapter skips)
    pub completed: usize,
    /// Cursor after the run; empty if nothing was ever committed
    pub cursor: String,
    /// Wall-clock time of the run
    pub elapsed: Duration,
}

impl RunSummary {
    /// Whether every queued item finished
    pub fn all_completed(&self) -> bool {
        self.completed == self.total
    }

    /// Completed items per second
    pub fn items_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.completed as f64 / secs
    }
}
