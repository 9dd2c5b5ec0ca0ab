//! Retry / backoff policy.
//!
//! Delay for a failed job is `base * factor^retry_count`, capped, where
//! `retry_count` is the value *after* the failure was recorded.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::job::Job;

/// Exponential backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay unit multiplied by `factor^retry_count`.
    pub base: Duration,
    pub factor: u32,
    /// Upper bound on any single delay.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    /// 1s base, factor 2, 300s cap.
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay for a job that has failed `retry_count` times.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = u64::from(self.factor)
            .checked_pow(retry_count)
            .unwrap_or(u64::MAX);
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor)).min(self.cap)
    }

    pub fn should_retry(&self, job: &Job) -> bool {
        job.retry_count() < job.max_retries()
    }

    /// Saturates at the latest representable instant.
    pub fn next_run_at(&self, job: &Job, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for(job.retry_count()))
            .unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Delay under the default policy for a job that has failed `retry_count` times.
pub fn backoff_delay(retry_count: u32) -> Duration {
    RetryPolicy::default().delay_for(retry_count)
}

/// `retry_count < max_retries` under the default policy.
pub fn should_retry(job: &Job) -> bool {
    RetryPolicy::default().should_retry(job)
}

/// `now + min(2^retry_count, 300)` seconds.
pub fn compute_next_run_at(job: &Job, now: DateTime<Utc>) -> DateTime<Utc> {
    RetryPolicy::default().next_run_at(job, now)
}
