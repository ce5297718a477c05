//! Pluggable order fulfillment.
//!
//! The processor only needs to know whether handling succeeded. Everything
//! between receipt and acknowledgement (payment, inventory, shipping, email)
//! lives behind [`OrderHandler`].

use crate::order::OrderRecord;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors reported by an [`OrderHandler`].
///
/// Any handler error causes the message to be abandoned (or dead-lettered once the
/// redelivery cap is reached).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// A fulfillment step failed.
    #[error("Step '{step}' failed: {reason}")]
    StepFailed {
        /// Step name, e.g. "Validating payment"
        step: String,
        /// Why it failed
        reason: String,
    },

    /// A downstream dependency could not be reached.
    #[error("Dependency unavailable: {0}")]
    Unavailable(String),

    /// Generic error for other failures
    #[error("Handler error: {0}")]
    Other(String),
}

/// Boxed future returned by [`OrderHandler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;

/// Fulfillment logic invoked once per delivery.
///
/// Handlers must tolerate being called more than once for the same order: delivery
/// is at-least-once.
pub trait OrderHandler: Send + Sync {
    /// Process one order.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] when the order could not be fulfilled.
    fn handle<'a>(&'a self, order: &'a OrderRecord) -> HandlerFuture<'a>;
}
