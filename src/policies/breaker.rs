//! # Dead-consumer breaker.
//!
//! [`FailureBreaker`] counts **consecutive** failed deliveries on one consumer queue,
//! across distinct messages. Any success resets the count. Reaching the threshold
//! trips the breaker once and resets it, so a consumer that keeps failing is reported
//! once per `threshold` failures rather than on every failure after the first trip.
//!
//! ```text
//! fail fail fail ok fail fail ... fail
//!  1    2    3   0   1    2   ...  N ──► trip (reported), count back to 0
//! ```

use std::sync::atomic::{AtomicU32, Ordering};

/// Consecutive-failure counter with a trip threshold (`0` disables tripping).
#[derive(Debug)]
pub struct FailureBreaker {
    threshold: u32,
    consecutive: AtomicU32,
}

impl FailureBreaker {
    /// Creates a breaker that trips after `threshold` consecutive failures.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive: AtomicU32::new(0),
        }
    }

    /// Records a successful delivery.
    #[inline]
    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::Release);
    }

    /// Records a failed delivery.
    ///
    /// Returns `Some(count)` exactly when this failure trips the breaker.
    pub fn record_failure(&self) -> Option<u32> {
        let count = self.consecutive.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if self.threshold > 0 && count >= self.threshold {
            self.consecutive.store(0, Ordering::Release);
            Some(count)
        } else {
            None
        }
    }

    /// Current consecutive failure count.
    #[inline]
    pub fn failures(&self) -> u32 {
        self.consecutive.load(Ordering::Acquire)
    }

    /// Configured threshold.
    #[inline]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_exactly_at_threshold() {
        let b = FailureBreaker::new(3);
        assert_eq!(b.record_failure(), None);
        assert_eq!(b.record_failure(), None);
        assert_eq!(b.record_failure(), Some(3));
        assert_eq!(b.failures(), 0);
    }

    #[test]
    fn success_resets_the_run() {
        let b = FailureBreaker::new(3);
        b.record_failure();
        b.record_failure();
        b.record_success();
        assert_eq!(b.failures(), 0);
        assert_eq!(b.record_failure(), None);
        assert_eq!(b.record_failure(), None);
        assert_eq!(b.record_failure(), Some(3));
    }

    #[test]
    fn zero_threshold_never_trips() {
        let b = FailureBreaker::new(0);
        for _ in 0..100 {
            assert_eq!(b.record_failure(), None);
        }
        assert_eq!(b.failures(), 100);
    }
}
