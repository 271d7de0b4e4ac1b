//! # Backoff Calculator
//!
//! Delay before the next attempt of a rescheduled envelope. Fixed, linear and
//! exponential growth, all capped at the configured maximum.

use std::time::Duration;

use crate::config::{BackoffPolicy, RetryConfig};

/// Computes retry delays from the retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffCalculator {
    policy: BackoffPolicy,
    base_delay: Duration,
    max_delay: Duration,
}

impl BackoffCalculator {
    pub fn new(policy: BackoffPolicy, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            policy,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.backoff, config.base_delay(), config.max_delay())
    }

    /// Delay after the `retries`-th failure (1-based; 0 is treated as 1)
    pub fn delay_for(&self, retries: u32) -> Duration {
        let attempt = retries.max(1);
        let delay = match self.policy {
            BackoffPolicy::Fixed => self.base_delay,
            BackoffPolicy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffPolicy::Exponential => {
                let exponent = (attempt - 1).min(31);
                self.base_delay.saturating_mul(1u32 << exponent)
            }
        };
        delay.min(self.max_delay)
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }
}
