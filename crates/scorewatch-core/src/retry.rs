//! Steady-state retry policy for monitors.
//!
//! Linear backoff: attempt `k` waits `base_delay × k`. No jitter and no cap
//! beyond `max_retries`. Pure state machine; the async caller owns the timers.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Sum of all scheduled delays when every retry fails.
    pub fn total_delay(&self) -> Duration {
        (1..=self.max_retries)
            .map(|attempt| self.delay_for(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Decision returned after recording a steady-state failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-run the start hook after `after`.
    Retry { attempt: u32, after: Duration },
    /// Budget spent; the monitor must report the error and stop.
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    retry_count: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retry_count: 0,
        }
    }

    pub fn record_failure(&mut self) -> RetryDecision {
        self.retry_count = self.retry_count.saturating_add(1);
        if self.retry_count <= self.policy.max_retries {
            RetryDecision::Retry {
                attempt: self.retry_count,
                after: self.policy.delay_for(self.retry_count),
            }
        } else {
            RetryDecision::Exhausted {
                attempts: self.retry_count,
            }
        }
    }

    /// Called on every successful (re)start and on every applied update.
    pub fn reset(&mut self) {
        self.retry_count = 0;
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}
