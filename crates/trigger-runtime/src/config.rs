//! triggerer config

use std::time::Duration;

/// Trigger runtime config.
#[derive(Debug, Clone)]
pub struct TriggererConfig {
    /// hard limit on how long a single trigger may run, `None` for no limit
    pub trigger_timeout: Option<Duration>,
    /// max number of finished triggers kept for stats
    pub max_history_size: usize,
    /// how long shutdown waits for running triggers to wind down
    pub shutdown_grace: Duration,
}

impl Default for TriggererConfig {
    fn default() -> Self {
        Self {
            trigger_timeout: None,
            max_history_size: 100,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl TriggererConfig {
    /// set trigger timeout.
    pub fn with_trigger_timeout(mut self, timeout: Duration) -> Self {
        self.trigger_timeout = Some(timeout);
        self
    }

    /// set finished trigger history size.
    pub fn with_max_history_size(mut self, size: usize) -> Self {
        self.max_history_size = size;
        self
    }

    /// set shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}
