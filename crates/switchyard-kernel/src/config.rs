//! Scheduler configuration.
//!
//! [`SchedulerConfig`] controls how many parallel lanes the scheduler starts
//! and how their threads are named and sized.  Defaults come from the
//! [`Default`] implementation; a builder-style API and a TOML loader are
//! provided for callers that want to override them.

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};

/// Lane pool settings for a [`Scheduler`](crate::scheduler::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of parallel lanes.  `0` means one lane per available
    /// processing unit.
    ///
    /// Default: **0**.
    pub parallel_lanes: usize,

    /// Prefix for lane thread names: `{prefix}-ordered` and
    /// `{prefix}-parallel-{i}`.
    ///
    /// Default: **"switchyard"**.
    pub thread_name_prefix: String,

    /// Stack size for each lane thread, in bytes.  `None` uses the platform
    /// default.
    pub stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallel_lanes: 0,
            thread_name_prefix: "switchyard".to_string(),
            stack_size: None,
        }
    }
}

impl SchedulerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML.  Missing keys keep their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(|e| QueueError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Set the number of parallel lanes (`0` = auto).
    pub fn with_parallel_lanes(mut self, lanes: usize) -> Self {
        self.parallel_lanes = lanes;
        self
    }

    /// Set the lane thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the lane thread stack size (in bytes).
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Resolve the parallel lane count, never less than one.
    pub fn resolved_parallel_lanes(&self) -> usize {
        if self.parallel_lanes == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.parallel_lanes
        }
    }

    /// Reject values that cannot produce a working lane pool.
    pub fn validate(&self) -> Result<()> {
        if self.thread_name_prefix.trim().is_empty() {
            return Err(QueueError::InvalidConfig {
                reason: "thread_name_prefix must not be empty".into(),
            });
        }
        if self.thread_name_prefix.contains('\0') {
            return Err(QueueError::InvalidConfig {
                reason: "thread_name_prefix must not contain nul bytes".into(),
            });
        }
        if self.stack_size == Some(0) {
            return Err(QueueError::InvalidConfig {
                reason: "stack_size must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub(crate) fn ordered_lane_name(&self) -> String {
        format!("{}-ordered", self.thread_name_prefix)
    }

    pub(crate) fn parallel_lane_name(&self, index: usize) -> String {
        format!("{}-parallel-{index}", self.thread_name_prefix)
    }
}
