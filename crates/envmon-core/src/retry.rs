use std::time::Duration;

use tracing::{info, warn};

use crate::config::{Backoff, RetryConfig};
use crate::state::{ConnectionPhase, ConnectivityState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    ScheduleRetry(Duration),
    FallbackToMock,
    // Fallback already fired for this outage.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    pub fn on_failure(&self, state: &mut ConnectivityState) -> RetryAction {
        state.mark_disconnected();

        if state.fallback_active {
            state.phase = ConnectionPhase::Failed;
            return RetryAction::Exhausted;
        }

        if state.retry_count < self.config.max_retries {
            state.retry_count += 1;
            state.phase = ConnectionPhase::Degraded;
            let delay = self.delay_for(state.retry_count);
            info!(
                attempt = state.retry_count,
                max_retries = self.config.max_retries,
                delay_ms = %delay.as_millis(),
                "scheduling retry"
            );
            return RetryAction::ScheduleRetry(delay);
        }

        warn!(max_retries = self.config.max_retries, "retries exhausted, falling back to mock data");
        state.fallback_active = true;
        state.phase = ConnectionPhase::Failed;
        RetryAction::FallbackToMock
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.config.backoff {
            Backoff::Fixed => self.config.delay,
            Backoff::Exponential { max_delay } => {
                let exponent = attempt.saturating_sub(1).min(31);
                self.config
                    .delay
                    .checked_mul(1_u32 << exponent)
                    .unwrap_or(max_delay)
                    .min(max_delay)
            }
        }
    }
}
