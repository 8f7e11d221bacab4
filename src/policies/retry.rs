//! # Retry policy for failed deliveries.
//!
//! [`RetryPolicy`] decides **whether** a failed message gets another attempt and
//! **how long** to wait first. The wait is drawn uniformly from
//! `[min_delay, max_delay]` on every retry, so consumers that failed together do not
//! retry together.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use notihub::RetryPolicy;
//!
//! let policy = RetryPolicy {
//!     max_retries: 2,
//!     min_delay: Duration::from_millis(100),
//!     max_delay: Duration::from_millis(300),
//! };
//!
//! assert!(policy.allows(0));
//! assert!(policy.allows(1));
//! assert!(!policy.allows(2));
//!
//! let d = policy.delay();
//! assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(300));
//! ```

use std::time::Duration;

use rand::Rng;

/// Bounded retry with a randomized delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed attempt.
    pub max_retries: u32,
    /// Lower bound of the delay before a retry.
    pub min_delay: Duration,
    /// Upper bound of the delay before a retry.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// Returns a policy with:
    /// - `max_retries = 5`;
    /// - delay in `[100ms, 1s]`.
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Whether a message that has already been retried `retries` times may be retried again.
    #[inline]
    pub fn allows(&self, retries: u32) -> bool {
        retries < self.max_retries
    }

    /// Draws the delay before the next retry.
    ///
    /// Uniform over `[min_delay, max_delay]` at millisecond granularity. Swapped bounds
    /// are tolerated; equal bounds give a fixed delay.
    pub fn delay(&self) -> Duration {
        let lo = self.min_delay.min(self.max_delay);
        let hi = self.min_delay.max(self.max_delay);

        let lo_ms = lo.as_millis().min(u128::from(u64::MAX)) as u64;
        let hi_ms = hi.as_millis().min(u128::from(u64::MAX)) as u64;
        if lo_ms >= hi_ms {
            return lo;
        }

        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(lo_ms..=hi_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_retries_never_allows() {
        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        assert!(!policy.allows(0));
    }

    #[test]
    fn delay_stays_within_bounds() {
        let policy = RetryPolicy {
            max_retries: 3,
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(80),
        };
        for _ in 0..200 {
            let d = policy.delay();
            assert!(d >= Duration::from_millis(50), "{d:?} below floor");
            assert!(d <= Duration::from_millis(80), "{d:?} above ceiling");
        }
    }

    #[test]
    fn delay_actually_varies() {
        let policy = RetryPolicy {
            max_retries: 3,
            min_delay: Duration::from_millis(0),
            max_delay: Duration::from_secs(10),
        };
        let first = policy.delay();
        assert!(
            (0..50).any(|_| policy.delay() != first),
            "50 draws over a 10s range all equal {first:?}"
        );
    }

    #[test]
    fn equal_bounds_are_fixed() {
        let policy = RetryPolicy {
            max_retries: 1,
            min_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(250),
        };
        assert_eq!(policy.delay(), Duration::from_millis(250));
    }

    #[test]
    fn swapped_bounds_are_tolerated() {
        let policy = RetryPolicy {
            max_retries: 1,
            min_delay: Duration::from_millis(900),
            max_delay: Duration::from_millis(100),
        };
        for _ in 0..50 {
            let d = policy.delay();
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(900));
        }
    }
}
