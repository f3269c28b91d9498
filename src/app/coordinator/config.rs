//! Configuration for the download coordinator

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::coordinator;

/// How queue items are spread over the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// One item at a time; the cursor is written once, after the whole queue
    Simple,
    /// One item per free session; the cursor follows the completed prefix
    #[default]
    MultiEgress,
}

/// Configuration for the download coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub mode: DispatchMode,
    /// Upper bound on one wait for a free session
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            poll_interval: coordinator::FREE_SESSION_POLL,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Items allowed in flight for a pool of `pool_size`
    pub fn concurrency(&self, pool_size: usize) -> usize {
        match self.mode {
            DispatchMode::Simple => pool_size.min(1),
            DispatchMode::MultiEgress => pool_size,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval.is_zero() {
            return Err("Poll interval cannot be zero".to_string());
        }
        Ok(())
    }
}
