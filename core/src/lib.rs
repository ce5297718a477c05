//! # Order Queue Core
//!
//! Core types and traits for handing finished orders to a queue for asynchronous
//! fulfillment.
//!
//! This crate is backend-agnostic. It defines what travels through the queue and
//! the contract every backing queue technology implements; the runtime crate puts
//! a service façade and a consumer loop on top.
//!
//! ## Core Concepts
//!
//! - **Order Record**: immutable, fully-priced payload ([`order::OrderRecord`])
//! - **Checkout**: turns a cart snapshot into an order with fixed pricing ([`checkout`])
//! - **Wire format**: stable PascalCase JSON ([`codec`])
//! - **Queue Backend**: send / receive / settle contract ([`queue::QueueBackend`])
//! - **Order Handler**: pluggable fulfillment logic ([`handler::OrderHandler`])
//!
//! ## Data Flow
//!
//! ```text
//! cart ──▶ OrderRecord::from_cart ──▶ send ──▶ backend ──▶ receive
//!                                                            │
//!                      complete / abandon / dead_letter ◀── handler
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use order_queue_core::checkout::{CartSnapshot, InMemoryCatalog};
//! use order_queue_core::environment::SystemClock;
//! use order_queue_core::order::OrderRecord;
//!
//! let mut cart = CartSnapshot::new(session_id);
//! cart.add_from_catalog(&catalog, 1, 2)?;
//! let order = OrderRecord::from_cart(&cart, &SystemClock)?;
//! service.send_order(&order).await?;
//! ```

pub mod checkout;
pub mod codec;
pub mod handler;
pub mod message;
pub mod order;
pub mod queue;

pub use codec::{CodecError, decode_order, encode_order};
pub use handler::{HandlerError, OrderHandler};
pub use message::{
    DeadLetterReason, DeadLetteredMessage, DeliveryState, LockToken, OutboundMessage,
    ReceivedMessage, Settlement,
};
pub use order::{OrderError, OrderId, OrderItem, OrderRecord, OrderTotals};
pub use queue::{QueueBackend, QueueError, QueueFuture};

/// Environment module - injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
