//! Order handlers for processor tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use order_queue_core::handler::{HandlerError, HandlerFuture, OrderHandler};
use order_queue_core::order::{OrderId, OrderRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Handler that succeeds and remembers every order it saw, in call order.
///
/// # Example
///
/// ```
/// use order_queue_testing::RecordingHandler;
///
/// let handler = RecordingHandler::new();
/// assert!(handler.handled().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    handled: Arc<Mutex<Vec<OrderId>>>,
    delay: Option<Duration>,
}

impl RecordingHandler {
    /// Create a handler that returns immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handler that sleeps for `delay` before succeeding.
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Orders handled so far, duplicates included.
    #[must_use]
    pub fn handled(&self) -> Vec<OrderId> {
        self.handled.lock().unwrap().clone()
    }

    /// Number of handler calls so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.handled.lock().unwrap().len()
    }
}

impl OrderHandler for RecordingHandler {
    fn handle<'a>(&'a self, order: &'a OrderRecord) -> HandlerFuture<'a> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.handled.lock().unwrap().push(order.order_id().clone());
            Ok(())
        })
    }
}

/// Handler that fails the first `failures` calls for each order, then succeeds.
///
/// Use [`ScriptedHandler::always_failing`] for a handler that never succeeds.
#[derive(Debug, Clone)]
pub struct ScriptedHandler {
    failures: u32,
    attempts: Arc<Mutex<HashMap<OrderId, u32>>>,
}

impl ScriptedHandler {
    /// Fail each order `failures` times before succeeding.
    #[must_use]
    pub fn failing_times(failures: u32) -> Self {
        Self {
            failures,
            attempts: Arc::default(),
        }
    }

    /// Fail every call.
    #[must_use]
    pub fn always_failing() -> Self {
        Self::failing_times(u32::MAX)
    }

    /// Calls seen for `order_id`.
    #[must_use]
    pub fn attempts(&self, order_id: &OrderId) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(order_id)
            .copied()
            .unwrap_or(0)
    }
}

impl OrderHandler for ScriptedHandler {
    fn handle<'a>(&'a self, order: &'a OrderRecord) -> HandlerFuture<'a> {
        Box::pin(async move {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let seen = attempts.entry(order.order_id().clone()).or_insert(0);
                *seen += 1;
                *seen
            };
            if attempt <= self.failures {
                Err(HandlerError::StepFailed {
                    step: "Validating payment".to_string(),
                    reason: format!("scripted failure {attempt}"),
                })
            } else {
                Ok(())
            }
        })
    }
}
