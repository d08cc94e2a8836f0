//! Retry task for tracked instructions

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::bus::{Event, EventData, Task, TaskContext, TaskResult};
use crate::Result;

/// Re-sends unacknowledged instructions on every timer tick
///
/// Retries only happen on idle ticks, when nothing is waiting to be
/// delivered; the timer is the only clock the retry policy uses.
#[derive(Debug, Clone)]
pub struct RetryTask {
    min_dwell: Duration,
}

impl RetryTask {
    /// Minimum time an instruction must have been out before a retry
    pub const DEFAULT_MIN_DWELL: Duration = Duration::from_secs(30);

    /// Create a retry task with the given dwell period
    pub fn new(min_dwell: Duration) -> Self {
        Self { min_dwell }
    }
}

impl Default for RetryTask {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN_DWELL)
    }
}

#[async_trait]
impl Task for RetryTask {
    fn name(&self) -> &'static str {
        "instruction-retry"
    }

    async fn handle_event(
        &mut self,
        event: &Event,
        ctx: &mut TaskContext<'_>,
    ) -> Result<Option<TaskResult>> {
        let now = match event.data {
            EventData::Timer { now } => now,
            _ => Instant::now(),
        };

        let report = ctx.retry_pending(now, self.min_dwell);
        if !report.skipped_busy && (!report.resent.is_empty() || !report.dropped.is_empty()) {
            tracing::debug!(
                resent = report.resent.len(),
                dropped = report.dropped.len(),
                "Retry cycle complete"
            );
        }
        Ok(None)
    }
}
