//! Sliding-window rate limiter for write operations.
//!
//! # Invariants
//! - At most `max_requests` admissions per operation name inside any trailing
//!   `window`.
//! - Denied attempts never consume quota.
//! - State is in-memory only and owned by one service instance.

use crate::config::RateLimitConfig;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Default admissions per window.
pub const DEFAULT_MAX_REQUESTS: usize = 100;
/// Default trailing window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Admissions left in the current window after this check.
    pub remaining: usize,
}

/// Per-operation sliding-window counters.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    windows: HashMap<String, VecDeque<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: HashMap::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, config.window())
    }

    /// Checks and records one attempt for `operation` at the current instant.
    pub fn check_rate_limit(&mut self, operation: &str) -> RateLimitDecision {
        self.check_rate_limit_at(operation, Instant::now())
    }

    /// Checks and records one attempt for `operation` at `now`.
    ///
    /// Timestamps older than the window are pruned first. Admission appends
    /// `now`; denial leaves the window untouched.
    pub fn check_rate_limit_at(&mut self, operation: &str, now: Instant) -> RateLimitDecision {
        let window = self.window;
        let timestamps = self.windows.entry(operation.to_string()).or_default();
        prune(timestamps, now, window);

        if timestamps.len() >= self.max_requests {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
            };
        }

        timestamps.push_back(now);
        RateLimitDecision {
            allowed: true,
            remaining: self.max_requests - timestamps.len(),
        }
    }

    /// Returns admissions left for `operation` at `now` without recording.
    pub fn remaining_at(&self, operation: &str, now: Instant) -> usize {
        let used = self
            .windows
            .get(operation)
            .map(|timestamps| {
                timestamps
                    .iter()
                    .filter(|ts| now.saturating_duration_since(**ts) < self.window)
                    .count()
            })
            .unwrap_or(0);
        self.max_requests.saturating_sub(used)
    }

    /// Forgets history for one operation.
    pub fn reset(&mut self, operation: &str) {
        self.windows.remove(operation);
    }

    /// Forgets all history, e.g. at session end.
    pub fn clear(&mut self) {
        self.windows.clear();
    }
}

fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = timestamps.front() {
        if now.saturating_duration_since(*oldest) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}
