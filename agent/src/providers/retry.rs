//! Retry decisions for failed artifact downloads

use std::time::Duration;

use crate::utils::{calc_exp_backoff, CooldownOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    Stop,
    Wait(Duration),
}

pub trait DownloadRetryPolicy: Send + Sync {
    /// `attempt` counts failures so far, starting at 1
    fn on_attempt(&self, attempt: u32, artifact_key: &str, previous_error: &str) -> RetryVerdict;
}

/// Exponential waits, giving up after `max_retries` failures
#[derive(Debug, Clone)]
pub struct ExponentialRetry {
    pub cooldown: CooldownOptions,
    pub max_retries: u32,
}

impl Default for ExponentialRetry {
    fn default() -> Self {
        Self {
            cooldown: CooldownOptions {
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(120),
                multiplier: 2.0,
            },
            max_retries: 5,
        }
    }
}

impl DownloadRetryPolicy for ExponentialRetry {
    fn on_attempt(&self, attempt: u32, _artifact_key: &str, _previous_error: &str) -> RetryVerdict {
        if attempt > self.max_retries {
            return RetryVerdict::Stop;
        }
        RetryVerdict::Wait(calc_exp_backoff(&self.cooldown, attempt.saturating_sub(1)))
    }
}
