//! Backend-agnostic order queue façade.
//!
//! [`OrderQueueService`] owns one [`QueueBackend`] for its lifetime. It turns
//! orders into messages (payload plus metadata), retries transient send failures,
//! and folds receive results into a small [`ReceiveOutcome`] so callers never have
//! to reason about backend-specific errors.
//!
//! # Example
//!
//! ```rust,ignore
//! use order_queue_runtime::{InMemoryQueue, OrderQueueService};
//!
//! let service = OrderQueueService::builder()
//!     .backend(Arc::new(InMemoryQueue::new()))
//!     .build()?;
//!
//! service.send_order(&order).await?;
//! ```

use crate::metrics::QueueMetrics;
use crate::retry::{RetryPolicy, retry_transient};
use chrono::SecondsFormat;
use order_queue_core::codec::{self, CONTENT_TYPE};
use order_queue_core::message::{DeadLetterReason, OutboundMessage, ReceivedMessage};
use order_queue_core::order::OrderRecord;
use order_queue_core::queue::{QueueBackend, QueueError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Application property carrying the order timestamp.
pub const PROPERTY_ORDER_DATE: &str = "OrderDate";

/// Application property carrying the order total.
pub const PROPERTY_TOTAL: &str = "Total";

/// Result of one receive attempt.
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// A message was received and is now held by the caller.
    Received(ReceivedMessage),
    /// Nothing arrived within the timeout.
    TimedOut,
    /// The backend could not be polled.
    Unavailable(QueueError),
}

/// Build the outbound message for an order.
///
/// The message id is the order id, which makes it the deduplication key.
///
/// # Errors
///
/// Returns [`QueueError::Serialization`] if the order cannot be encoded.
pub fn order_message(order: &OrderRecord) -> Result<OutboundMessage, QueueError> {
    let body = codec::encode_order(order).map_err(|e| QueueError::Serialization(e.to_string()))?;
    let mut message = OutboundMessage::new(order.order_id().as_str(), body)
        .with_subject(format!("Order {}", order.order_id()))
        .with_property(
            PROPERTY_ORDER_DATE,
            order.order_date().to_rfc3339_opts(SecondsFormat::AutoSi, true),
        )
        .with_property(PROPERTY_TOTAL, order.total().to_string());
    message.content_type = CONTENT_TYPE.to_string();
    Ok(message)
}

/// Order queue façade over a single backend.
pub struct OrderQueueService {
    backend: Arc<dyn QueueBackend>,
    send_retry: RetryPolicy,
}

impl OrderQueueService {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> OrderQueueServiceBuilder {
        OrderQueueServiceBuilder::default()
    }

    /// Wrap a backend with the default send retry policy.
    #[must_use]
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            backend,
            send_retry: RetryPolicy::default(),
        }
    }

    /// Name of the underlying backend.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Shared handle to the underlying backend.
    #[must_use]
    pub fn backend(&self) -> Arc<dyn QueueBackend> {
        Arc::clone(&self.backend)
    }

    /// Enqueue an order.
    ///
    /// Transient backend errors are retried with the configured policy. Each order
    /// must be sent with a fresh `order_id`; resending the same id is only safe on
    /// backends with duplicate detection.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Serialization`] if the order cannot be encoded, or the
    /// backend error once retries are exhausted.
    #[instrument(skip(self, order), fields(order_id = %order.order_id(), backend = self.backend.name()))]
    pub async fn send_order(&self, order: &OrderRecord) -> Result<(), QueueError> {
        let message = order_message(order)?;
        let started = Instant::now();
        let backend = self.backend.name();

        let result = retry_transient(&self.send_retry, "send_order", || {
            self.backend.send(message.clone())
        })
        .await;

        match &result {
            Ok(()) => {
                QueueMetrics::record_send(backend, started.elapsed());
                tracing::info!(total = %order.total(), items = order.items().len(), "Order sent to queue");
            }
            Err(e) => {
                QueueMetrics::record_send_error(backend);
                tracing::error!(error = %e, "Failed to send order to queue");
            }
        }
        result
    }

    /// Wait up to `timeout` for the next message.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn receive(&self, timeout: Duration) -> ReceiveOutcome {
        let backend = self.backend.name();
        match self.backend.receive(timeout).await {
            Ok(Some(message)) => {
                QueueMetrics::record_receive(backend);
                tracing::debug!(
                    message_id = %message.message_id,
                    delivery_count = message.delivery_count,
                    "Message received"
                );
                ReceiveOutcome::Received(message)
            }
            Ok(None) => {
                QueueMetrics::record_receive_timeout(backend);
                ReceiveOutcome::TimedOut
            }
            Err(e) => {
                QueueMetrics::record_receive_error(backend);
                tracing::warn!(error = %e, "Receive failed");
                ReceiveOutcome::Unavailable(e)
            }
        }
    }

    /// Remove a handled message.
    ///
    /// # Errors
    ///
    /// Propagates the backend error, [`QueueError::LockLost`] when the message is
    /// no longer held.
    pub async fn complete(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        self.backend.complete(message).await
    }

    /// Release a message for redelivery.
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn abandon(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        self.backend.abandon(message).await
    }

    /// Park a message in the dead-letter channel.
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn dead_letter(
        &self,
        message: &ReceivedMessage,
        reason: &DeadLetterReason,
    ) -> Result<(), QueueError> {
        self.backend.dead_letter(message, reason).await
    }

    /// Extend the lease on a held message.
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn renew_lock(
        &self,
        message: &ReceivedMessage,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, QueueError> {
        self.backend.renew_lock(message).await
    }

    /// Advisory number of waiting orders, `None` when the backend cannot tell.
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn approximate_count(&self) -> Result<Option<u64>, QueueError> {
        let count = self.backend.approximate_count().await?;
        if let Some(count) = count {
            QueueMetrics::record_approximate_count(self.backend.name(), count);
        }
        Ok(count)
    }

    /// Release the backend.
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn close(&self) -> Result<(), QueueError> {
        tracing::info!(backend = self.backend.name(), "Closing order queue");
        self.backend.close().await
    }
}

/// Builder for [`OrderQueueService`].
#[derive(Default)]
pub struct OrderQueueServiceBuilder {
    backend: Option<Arc<dyn QueueBackend>>,
    send_retry: Option<RetryPolicy>,
}

impl OrderQueueServiceBuilder {
    /// Set the backend (required).
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn QueueBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the retry policy for sends (default: [`RetryPolicy::default`]).
    #[must_use]
    pub fn send_retry(mut self, policy: RetryPolicy) -> Self {
        self.send_retry = Some(policy);
        self
    }

    /// Build the service.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Configuration`] if no backend was set.
    pub fn build(self) -> Result<OrderQueueService, QueueError> {
        let backend = self
            .backend
            .ok_or_else(|| QueueError::Configuration("backend is required".to_string()))?;
        Ok(OrderQueueService {
            backend,
            send_retry: self.send_retry.unwrap_or_default(),
        })
    }
}
