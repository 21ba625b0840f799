//! Scheduler configuration.
//!
//! The scheduler has exactly one configuration point for deferred execution:
//! the [`TickSource`]. Everything else is tuning.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where scheduled flushes run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickSource {
    /// The host drains the queue with [`run_pending`](super::run_pending)
    /// at a fixed point of its event loop.
    #[default]
    Manual,
    /// Each flush is spawned on the current-thread tokio runtime and runs
    /// once the current task yields, whether or not a `LocalSet` drives the
    /// caller. Outside a runtime, or on a multi-thread runtime where the
    /// task could move to another thread, the flush is left for
    /// `run_pending` and a warning is logged.
    LocalSet,
}

/// Order in which queued watchers run within a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushOrder {
    /// First invalidated, first run.
    #[default]
    Enqueue,
    /// By watcher creation order, so that an enclosing computation (created
    /// first) runs before the ones it contains.
    Creation,
}

/// Configuration for the per-thread scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Deferred-execution primitive used to schedule flushes. Default: `Manual`.
    pub tick: TickSource,
    /// Run order within a flush. Default: `Enqueue`.
    pub order: FlushOrder,
    /// Consecutive flushes a watcher may re-queue itself into before it is
    /// treated as an infinite update loop and dropped. Default: 100.
    pub max_update_count: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: TickSource::Manual,
            order: FlushOrder::Enqueue,
            max_update_count: 100,
        }
    }
}

impl SchedulerConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).map_err(|e| Error::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.max_update_count == 0 {
            return Err(Error::InvalidConfig {
                reason: "max_update_count must be at least 1".into(),
            });
        }
        Ok(())
    }
}
