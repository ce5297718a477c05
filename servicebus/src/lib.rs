//! Azure Service Bus queue backend for the order queue.
//!
//! Talks to the Service Bus REST API with shared-access-signature
//! authentication. No AMQP client is involved, so the backend is a plain
//! [`reqwest`] client and works anywhere HTTPS does.
//!
//! # Delivery Semantics
//!
//! **Peek-lock** receives:
//! - `receive` long-polls `POST /{queue}/messages/head`; `201` carries a
//!   locked message, `204` means nothing arrived within the timeout
//! - `complete` deletes the locked message, `abandon` unlocks it, `renew_lock`
//!   extends the lock
//! - `dead_letter` forwards the message with its reason to a side queue
//!   (default `<queue>-deadletter`) and then completes the original
//! - the broker counts deliveries, so redelivery is visible to the consumer
//!
//! # Example
//!
//! ```no_run
//! use order_queue_servicebus::ServiceBusQueue;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = ServiceBusQueue::builder()
//!     .connection_string(std::env::var("SERVICEBUS_CONNECTION_STRING")?)
//!     .queue_name("product-catalog-orders")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
mod queue;

pub use connection::{ConnectionString, sas_token};
pub use queue::{
    DEAD_LETTER_DESCRIPTION_PROPERTY, DEAD_LETTER_REASON_PROPERTY, ServiceBusQueue,
    ServiceBusQueueBuilder,
};
