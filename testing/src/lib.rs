//! # Order Queue Testing
//!
//! Testing utilities and helpers for the order queue.
//!
//! This crate provides:
//! - A fixed [`Clock`](order_queue_core::environment::Clock) for deterministic order dates
//! - Product, cart and order fixtures
//! - Handlers that record or fail on command
//! - A backend wrapper that injects transient failures
//!
//! ## Example
//!
//! ```ignore
//! use order_queue_testing::{RecordingHandler, fixtures};
//!
//! #[tokio::test]
//! async fn test_order_is_handled() {
//!     let handler = Arc::new(RecordingHandler::new());
//!     let order = fixtures::sample_order();
//!     // ... run a processor with `handler` ...
//!     assert_eq!(handler.handled(), vec![order.order_id().clone()]);
//! }
//! ```

use chrono::{DateTime, Utc};
use order_queue_core::environment::Clock;

pub mod fixtures;
pub mod flaky_queue;
pub mod handlers;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use order_queue_testing::mocks::FixedClock;
    /// use order_queue_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; output goes through the test writer so it only shows for
/// failing tests.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use flaky_queue::FlakyQueue;
pub use handlers::{RecordingHandler, ScriptedHandler};
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }
}
