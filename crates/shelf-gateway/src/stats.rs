// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC call statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters for an [`RpcBridge`](crate::rpc::RpcBridge).
#[derive(Debug)]
pub struct CallStats {
    /// Calls started.
    pub calls: AtomicU64,

    /// Calls answered by a matching reply.
    pub replies: AtomicU64,

    /// Calls that gave up waiting.
    pub timeouts: AtomicU64,

    /// Calls failed on a broker step or cancelled.
    pub failures: AtomicU64,

    /// Deliveries ignored because their correlation id did not match.
    pub discarded: AtomicU64,

    /// Creation time.
    pub created: Instant,
}

impl CallStats {
    /// Create new stats.
    pub fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            replies: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub(crate) fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reply(&self) {
        self.replies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self, count: u64) {
        self.discarded.fetch_add(count, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> CallStatsSnapshot {
        CallStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            replies: self.replies.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

impl Default for CallStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of call statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct CallStatsSnapshot {
    pub calls: u64,
    pub replies: u64,
    pub timeouts: u64,
    pub failures: u64,
    pub discarded: u64,
    pub uptime_secs: u64,
}

impl CallStatsSnapshot {
    /// Calls still waiting (started but neither answered nor failed).
    pub fn in_flight(&self) -> u64 {
        self.calls
            .saturating_sub(self.replies + self.timeouts + self.failures)
    }

    /// Calls per second since creation.
    pub fn calls_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.calls as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_stats() {
        let stats = CallStats::new();

        stats.record_call();
        stats.record_call();
        stats.record_call();
        stats.record_reply();
        stats.record_timeout();
        stats.record_discarded(2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.calls, 3);
        assert_eq!(snapshot.replies, 1);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.failures, 0);
        assert_eq!(snapshot.discarded, 2);
        assert_eq!(snapshot.in_flight(), 1);
    }
}
