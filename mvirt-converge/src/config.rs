//! Engine configuration.

use std::time::Duration;

/// Timing and concurrency settings shared by the engine and controllers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Requeue interval after a pass that found the resource available.
    pub poll_interval: Duration,
    /// Requeue interval while the provider is still provisioning.
    pub wait_interval: Duration,
    /// First retry delay after a failed pass.
    pub error_backoff_base: Duration,
    /// Upper bound for the retry delay.
    pub max_backoff: Duration,
    /// Wall-clock budget for a single pass.
    pub reconcile_timeout: Duration,
    /// Maximum concurrent passes per controller.
    pub concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            wait_interval: Duration::from_secs(15),
            error_backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            reconcile_timeout: Duration::from_secs(120),
            concurrency: 5,
        }
    }
}

impl EngineConfig {
    /// Clamp values that would stall the controller.
    pub fn normalized(mut self) -> Self {
        self.concurrency = self.concurrency.max(1);
        if self.max_backoff < self.error_backoff_base {
            self.max_backoff = self.error_backoff_base;
        }
        self
    }
}
