//! Retry policy for outbound calls, independent of any transport
//!
//! Decides which outcomes are worth another attempt and how long to wait
//! between attempts. The A2A client drives the loop; this module only answers
//! questions, so it can be tested without a network.

use super::{HttpResponse, TransportError};
use std::time::Duration;

/// What to do with the outcome of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    /// Connection failure, timeout or 5xx
    Transient,
    /// 4xx or a non-retryable transport failure
    Terminal,
}

/// Attempt budget and exponential backoff curve
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least 1
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(500), Duration::from_secs(8))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            backoff_cap,
        }
    }

    /// Single attempt, no backoff
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Only 5xx statuses are retried
    pub fn is_transient_status(status: u16) -> bool {
        (500..600).contains(&status)
    }

    pub fn classify(outcome: &Result<HttpResponse, TransportError>) -> Disposition {
        match outcome {
            Ok(response) if response.is_success() => Disposition::Success,
            Ok(response) if Self::is_transient_status(response.status) => Disposition::Transient,
            Ok(_) => Disposition::Terminal,
            Err(e) if e.is_transient() => Disposition::Transient,
            Err(_) => Disposition::Terminal,
        }
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    pub fn should_retry(&self, attempts_made: u32, disposition: Disposition) -> bool {
        disposition == Disposition::Transient && attempts_made < self.max_attempts
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }
}
