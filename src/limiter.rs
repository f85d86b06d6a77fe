// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Sliding window rate limiter for form submissions.
//!
//! Each client identity owns the timestamps of its recent attempts. On every
//! call the entry is pruned to the trailing window, the current attempt is
//! appended, and the attempt is rejected when the window then holds more
//! than the configured limit. Rejected attempts stay in the window, so a
//! client that keeps retrying keeps itself locked out.
//!
//! Entries are pruned lazily on the next access by the same key and are
//! never removed otherwise.

use crate::config::RateLimitConfig;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Source of the current time.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;
}

/// Clock backed by `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Thread-safe per-client admission control.
#[derive(Debug)]
pub struct SubmissionLimiter {
    enabled: bool,
    limit: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
    /// Attempt timestamps per client, oldest first
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SubmissionLimiter {
    /// Create a limiter driven by the system clock.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a limiter driven by the given clock.
    pub fn with_clock(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled: config.enabled,
            limit: config.max_requests,
            window: config.window_duration(),
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt by `identity` and decide whether it is admitted.
    ///
    /// Always admits without bookkeeping when rate limiting is disabled.
    pub async fn admit(&self, identity: &str) -> bool {
        if !self.enabled {
            return true;
        }

        // Prune, append and count under one lock so concurrent attempts
        // never observe a stale count.
        let mut windows = self.windows.lock().await;
        let now = self.clock.now();
        let attempts = windows.entry(identity.to_string()).or_default();

        while let Some(oldest) = attempts.front() {
            if now.duration_since(*oldest) > self.window {
                attempts.pop_front();
            } else {
                break;
            }
        }
        attempts.push_back(now);

        let count = attempts.len();
        if count > self.limit {
            debug!(ip = %identity, count, limit = self.limit, "Submission rate exceeded");
            false
        } else {
            true
        }
    }

    /// Number of client identities currently tracked.
    pub async fn tracked_clients(&self) -> usize {
        self.windows.lock().await.len()
    }
}
