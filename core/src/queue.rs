//! Queue backend abstraction.
//!
//! This module provides the [`QueueBackend`] trait implemented by every backing
//! queue technology (in-process, file-backed, managed cloud). The contract is the
//! same for all of them:
//!
//! - **At-least-once delivery**: a received message that is not completed comes
//!   back, either after an explicit abandon or when its lease expires
//! - **Single holder**: at most one consumer holds a given message at a time
//! - **Explicit settlement**: the holder settles every message exactly once with
//!   `complete`, `abandon` or `dead_letter`
//! - **Best-effort FIFO**: abandoned messages may be received after younger ones
//!
//! # Implementations
//!
//! - `InMemoryQueue` (runtime crate) - ephemeral, in-process
//! - `FileQueue` (file crate) - durable, one file per message
//! - `ServiceBusQueue` (servicebus crate) - managed broker with peek-lock leases

use crate::message::{DeadLetterReason, OutboundMessage, ReceivedMessage};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Missing or invalid backend configuration. Fatal at startup.
    #[error("Queue configuration error: {0}")]
    Configuration(String),

    /// The backend could not be reached. Usually transient.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// A backend call did not finish in time.
    #[error("Queue operation timed out: {0}")]
    Timeout(String),

    /// A message could not be encoded or decoded at the backend boundary.
    #[error("Queue serialization error: {0}")]
    Serialization(String),

    /// The message is not held by the caller (already settled, or the lease ran out).
    #[error("Message lock lost: {0}")]
    LockLost(String),

    /// A message with the same id is already queued.
    #[error("Duplicate message: {0}")]
    Duplicate(String),

    /// Local I/O failure.
    #[error("Queue I/O error: {0}")]
    Io(String),

    /// The backend has been closed.
    #[error("Queue is closed")]
    Closed,

    /// Generic error for other failures
    #[error("Queue error: {0}")]
    Other(String),
}

impl QueueError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_) | Self::Io(_))
    }
}

impl From<std::io::Error> for QueueError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Boxed future returned by [`QueueBackend`] operations.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Trait for queue backend implementations.
///
/// # Dyn Compatibility
///
/// Operations return [`QueueFuture`] instead of using `async fn` so backends can be
/// selected at startup and held as `Arc<dyn QueueBackend>`.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one producer and one consumer may call
/// into the same backend concurrently.
pub trait QueueBackend: Send + Sync {
    /// Short backend name used in logs and metrics labels.
    fn name(&self) -> &'static str;

    /// Persist a message.
    ///
    /// Safe to call from several producers at once. Backends with duplicate
    /// detection accept a repeated `message_id` that is still held without
    /// enqueuing a second copy.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] or [`QueueError::Io`] when the message
    /// could not be persisted, and [`QueueError::Closed`] after `close`.
    fn send(&self, message: OutboundMessage) -> QueueFuture<'_, ()>;

    /// Wait up to `timeout` for a message and lock it for the caller.
    ///
    /// Returns `Ok(None)` when nothing arrived in time; a timeout is not an error.
    ///
    /// # Errors
    ///
    /// Returns a transient error when the backend could not be polled.
    fn receive(&self, timeout: Duration) -> QueueFuture<'_, Option<ReceivedMessage>>;

    /// Remove a held message permanently.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LockLost`] when the message is no longer held, which
    /// includes a second `complete` of the same delivery.
    fn complete<'a>(&'a self, message: &'a ReceivedMessage) -> QueueFuture<'a, ()>;

    /// Release a held message so it can be received again.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LockLost`] when the message is no longer held.
    fn abandon<'a>(&'a self, message: &'a ReceivedMessage) -> QueueFuture<'a, ()>;

    /// Move a held message to the dead-letter side channel.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LockLost`] when the message is no longer held.
    fn dead_letter<'a>(
        &'a self,
        message: &'a ReceivedMessage,
        reason: &'a DeadLetterReason,
    ) -> QueueFuture<'a, ()>;

    /// Extend the lease on a held message.
    ///
    /// Returns the new expiry, or `None` for backends without leases. The default
    /// implementation does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LockLost`] when the lease already expired.
    fn renew_lock<'a>(
        &'a self,
        message: &'a ReceivedMessage,
    ) -> QueueFuture<'a, Option<DateTime<Utc>>> {
        let _ = message;
        Box::pin(async { Ok(None) })
    }

    /// Advisory number of available messages, `None` when unknown.
    ///
    /// # Errors
    ///
    /// Returns a transient error when the backend could not be queried.
    fn approximate_count(&self) -> QueueFuture<'_, Option<u64>>;

    /// Release backend resources. Later calls fail with [`QueueError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns an error if resources could not be released cleanly.
    fn close(&self) -> QueueFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(QueueError::Unavailable("down".into()).is_transient());
        assert!(QueueError::Timeout("slow".into()).is_transient());
        assert!(QueueError::Io("disk".into()).is_transient());
        assert!(!QueueError::Configuration("bad".into()).is_transient());
        assert!(!QueueError::LockLost("gone".into()).is_transient());
        assert!(!QueueError::Closed.is_transient());
    }

    #[test]
    fn io_errors_convert() {
        let err: QueueError = std::io::Error::other("boom").into();
        assert_eq!(err, QueueError::Io("boom".to_string()));
    }
}
