// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! Process-local operation counters.
//!
//! These live in this process, not in the shared region: every mapper keeps
//! its own tallies of what it did to the bus. All counters use `Relaxed`
//! ordering; the numbers are eventually consistent across threads and meant
//! for dashboards and tests, not for synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

/// Bus operation metrics with atomic counters.
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// Successful set operations
    pub sets: AtomicU64,
    /// Successful get operations
    pub gets: AtomicU64,
    /// Successful unset operations
    pub unsets: AtomicU64,
    /// Poll calls issued
    pub polls: AtomicU64,
    /// Retryable conditions surfaced (writer-active / torn snapshot)
    pub retries: AtomicU64,
    /// Signal-group pulses emitted
    pub pulses: AtomicU64,
}

impl BusMetrics {
    /// New metrics instance with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sets: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            unsets: AtomicU64::new(0),
            polls: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            pulses: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_sets(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_gets(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_unsets(&self) {
        self.unsets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_polls(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_pulses(&self) {
        self.pulses.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.sets.store(0, Ordering::Relaxed);
        self.gets.store(0, Ordering::Relaxed);
        self.unsets.store(0, Ordering::Relaxed);
        self.polls.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.pulses.store(0, Ordering::Relaxed);
    }

    /// Get a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            sets: self.sets.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            unsets: self.unsets.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            pulses: self.pulses.load(Ordering::Relaxed),
        }
    }
}

/// Non-atomic copy of the counters, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusMetricsSnapshot {
    pub sets: u64,
    pub gets: u64,
    pub unsets: u64,
    pub polls: u64,
    pub retries: u64,
    pub pulses: u64,
}

impl BusMetricsSnapshot {
    /// Retryable misses per successful read - a rough contention gauge.
    #[must_use]
    pub fn retry_ratio(&self) -> f64 {
        if self.gets == 0 {
            0.0
        } else {
            self.retries as f64 / self.gets as f64
        }
    }
}

impl std::fmt::Display for BusMetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sets={} gets={} unsets={} polls={} retries={} pulses={}",
            self.sets, self.gets, self.unsets, self.polls, self.retries, self.pulses
        )
    }
}

/// Global metrics instance for this process.
static GLOBAL_METRICS: BusMetrics = BusMetrics::new();

/// Access the process-wide metrics.
#[must_use]
pub fn global_metrics() -> &'static BusMetrics {
    &GLOBAL_METRICS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counters_accumulate() {
        let m = BusMetrics::new();
        m.inc_sets();
        m.inc_sets();
        m.inc_retries();

        let snap = m.snapshot();
        assert_eq!(snap.sets, 2);
        assert_eq!(snap.retries, 1);
        assert_eq!(snap.gets, 0);
    }

    #[test]
    fn test_reset() {
        let m = BusMetrics::new();
        m.inc_pulses();
        m.reset();
        assert_eq!(m.snapshot().pulses, 0);
    }

    #[test]
    fn test_metrics_thread_safety() {
        use std::sync::Arc;

        let m = Arc::new(BusMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        m.inc_sets();
                        m.inc_gets();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(m.snapshot().sets, 4000);
        assert_eq!(m.snapshot().gets, 4000);
    }

    #[test]
    fn test_display_format() {
        let m = BusMetrics::new();
        m.inc_sets();
        let s = m.snapshot().to_string();
        assert!(s.contains("sets=1"));
        assert!(s.contains("retries=0"));
    }
}
