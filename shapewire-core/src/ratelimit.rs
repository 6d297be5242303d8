// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Lock-free limiter for diagnostics emitted from packet paths.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Allows at most one message per interval and counts the rest.
#[derive(Debug)]
pub struct RateLimiter {
    origin: Instant,
    interval_ms: u64,
    /// Milliseconds since `origin` before which messages are suppressed.
    next_ms: AtomicU64,
    suppressed: AtomicU64,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            interval_ms: interval.as_millis() as u64,
            next_ms: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Returns `Some(suppressed)` if the caller may log now, where
    /// `suppressed` is the number of messages dropped since the last one.
    pub fn check(&self) -> Option<u64> {
        let now = self.origin.elapsed().as_millis() as u64;
        let next = self.next_ms.load(Ordering::Relaxed);
        if now >= next
            && self
                .next_ms
                .compare_exchange(
                    next,
                    now + self.interval_ms,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
        {
            return Some(self.suppressed.swap(0, Ordering::AcqRel));
        }
        self.suppressed.fetch_add(1, Ordering::Relaxed);
        None
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_message_passes_then_suppressed() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        assert_eq!(limiter.check(), Some(0));
        assert_eq!(limiter.check(), None);
        assert_eq!(limiter.check(), None);
    }

    #[test]
    fn test_zero_interval_never_suppresses() {
        let limiter = RateLimiter::new(Duration::ZERO);
        assert_eq!(limiter.check(), Some(0));
        assert_eq!(limiter.check(), Some(0));
    }

    #[test]
    fn test_reports_suppressed_count() {
        let limiter = RateLimiter::new(Duration::from_millis(20));
        assert_eq!(limiter.check(), Some(0));
        assert_eq!(limiter.check(), None);
        assert_eq!(limiter.check(), None);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(limiter.check(), Some(2));
    }
}
