// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Truncated exponential backoff with jitter.
//!
//! Used for STOMP reconnects and unacknowledged notification retries.
//! The wait before attempt `n` is drawn uniformly from
//! `0..initial * (multiplier/1000)^(n-1)` and capped at `max_interval`,
//! matching the retry algorithm of the `Device.STOMP.Connection.{i}`
//! retry parameters. A per-item maximum elapsed time bounds the total
//! retry effort; expiry is reported to the owning component as permanent
//! failure.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Backoff parameters of one retry category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base interval for the first retry (seconds).
    pub initial_interval: u64,
    /// Growth per retry, in thousandths (2000 = x2.0).
    pub interval_multiplier: u32,
    /// Cap on any single wait (seconds).
    pub max_interval: u64,
}

impl RetryPolicy {
    pub fn new(initial_interval: u64, interval_multiplier: u32, max_interval: u64) -> Self {
        Self {
            initial_interval,
            interval_multiplier,
            max_interval,
        }
    }

    /// Policy for STOMP reconnects, from the config defaults.
    pub fn stomp_default() -> Self {
        Self::new(
            crate::config::STOMP_RETRY_INITIAL_INTERVAL,
            crate::config::STOMP_RETRY_INTERVAL_MULTIPLIER,
            crate::config::STOMP_RETRY_MAX_INTERVAL,
        )
    }

    /// Policy for notification retries.
    pub fn notify_default() -> Self {
        Self::new(
            crate::config::NOTIFY_RETRY_INITIAL_INTERVAL,
            crate::config::NOTIFY_RETRY_INTERVAL_MULTIPLIER,
            crate::config::NOTIFY_RETRY_MAX_INTERVAL,
        )
    }

    /// Upper bound of the jitter range for attempt `retry_count`
    /// (1-based), in seconds.
    fn range(&self, retry_count: u32) -> u64 {
        let count = retry_count.max(1);
        let multiplier = f64::from(self.interval_multiplier) / 1000.0;
        let range = self.initial_interval as f64 * multiplier.powi(count as i32 - 1);
        let range = range.min(self.max_interval as f64);
        (range as u64).max(1)
    }
}

/// Per-category scheduler: policy plus a jitter source.
#[derive(Debug)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    seed: u64,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        // Seed from the clock; the sequence only needs to decorrelate
        // concurrently retrying items, not be unpredictable.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e37_79b9_7f4a_7c15)
            | 1;
        Self { policy, seed }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    fn next_rand(&mut self) -> u64 {
        // xorshift64: small, deterministic, good enough for jitter.
        let mut x = self.seed;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.seed = x;
        x
    }

    /// Wait before retry attempt `retry_count` (1-based).
    pub fn next_delay(&mut self, retry_count: u32) -> Duration {
        let range = self.policy.range(retry_count);
        let wait = self.next_rand() % range;
        Duration::from_secs(wait.min(self.policy.max_interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_within_the_truncated_range() {
        let policy = RetryPolicy::new(60, 2000, 30720);
        let mut sched = RetryScheduler::new(policy);
        for count in 1..=12 {
            let upper = policy.range(count);
            for _ in 0..50 {
                let delay = sched.next_delay(count).as_secs();
                assert!(delay < upper.max(1) || delay <= policy.max_interval);
                assert!(delay <= policy.max_interval);
            }
        }
    }

    #[test]
    fn range_grows_exponentially_and_caps() {
        let policy = RetryPolicy::new(60, 2000, 30720);
        assert_eq!(policy.range(1), 60);
        assert_eq!(policy.range(2), 120);
        assert_eq!(policy.range(5), 960);
        // 60 * 2^11 = 122880 caps at 30720.
        assert_eq!(policy.range(12), 30720);
        assert_eq!(policy.range(30), 30720);
    }

    #[test]
    fn retry_count_zero_behaves_like_one() {
        let policy = RetryPolicy::new(10, 2000, 100);
        assert_eq!(policy.range(0), policy.range(1));
    }

    #[test]
    fn minimum_range_is_one_second() {
        let policy = RetryPolicy::new(0, 1000, 10);
        assert_eq!(policy.range(1), 1);
        let mut sched = RetryScheduler::new(policy);
        assert_eq!(sched.next_delay(1), Duration::from_secs(0));
    }
}
