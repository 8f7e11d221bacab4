//! Retry and breaker policies.
//!
//! This module groups the knobs that control **whether** a failed delivery is
//! retried, **how long** to wait first, and **when** a consumer is declared dead.
//!
//! ## Contents
//! - [`RetryPolicy`]    bounded retries with a randomized delay in `[min, max]`
//! - [`FailureBreaker`] consecutive-failure counter that trips at a threshold
//!
//! ## Quick wiring
//! ```text
//! Config ──► ConsumerQueue uses:
//!              - retry.allows(retries) to re-append or drop a failed message
//!              - retry.delay() to space the retry
//!              - breaker.record_failure() to report a dead consumer to the registry
//! ```

mod breaker;
mod retry;

pub use breaker::FailureBreaker;
pub use retry::RetryPolicy;
