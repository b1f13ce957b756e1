use crate::config::{BackoffConfig, BackoffStrategy, CrawlerConfig};
use crate::fetch::FetchError;
use std::collections::HashSet;
use std::time::Duration;

/// Delay schedule between attempts
///
/// `delay(k)` is the wait before retry `k` (1-based). Both variants are
/// non-decreasing in `k` and never exceed `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `step * k`, capped at `max`
    Linear { step: Duration, max: Duration },

    /// `base * 2^(k-1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn delay(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        match *self {
            Self::Linear { step, max } => step.saturating_mul(retry).min(max),
            Self::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(retry - 1);
                base.saturating_mul(factor).min(max)
            }
        }
    }

    pub fn max(&self) -> Duration {
        match *self {
            Self::Linear { max, .. } | Self::Exponential { max, .. } => max,
        }
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        let base = Duration::from_millis(config.base_delay_ms);
        let max = Duration::from_millis(config.max_delay_ms);
        match config.strategy {
            BackoffStrategy::Linear => Self::Linear { step: base, max },
            BackoffStrategy::Exponential => Self::Exponential { base, max },
        }
    }
}

/// When and how often a fetch is retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Wall-clock bound for each attempt
    pub attempt_timeout: Duration,

    /// Status codes treated as transient
    pub retryable_statuses: HashSet<u16>,

    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&CrawlerConfig::default())
    }
}

impl From<&CrawlerConfig> for RetryPolicy {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            retryable_statuses: config.retryable_status_codes.iter().copied().collect(),
            backoff: Backoff::from(&config.backoff),
        }
    }
}

impl RetryPolicy {
    /// Total attempts allowed per item
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn is_retryable(&self, err: &FetchError) -> bool {
        err.is_transient(&self.retryable_statuses)
    }

    /// Wait before retry `retry`, stretched to a server's `Retry-After`
    /// but never beyond the backoff maximum
    pub fn delay_for(&self, retry: u32, err: &FetchError) -> Duration {
        let delay = self.backoff.delay(retry);
        match err.retry_after() {
            Some(requested) => delay.max(requested.min(self.backoff.max())),
            None => delay,
        }
    }
}
