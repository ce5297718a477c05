//! # Order Queue Runtime
//!
//! Runtime pieces that sit on top of the backend contract from
//! `order-queue-core`.
//!
//! ## Core Components
//!
//! - **Order Queue Service**: backend-agnostic façade for producers and consumers
//! - **Order Processor**: the receive → handle → acknowledge loop
//! - **In-memory Queue**: ephemeral in-process FIFO backend
//! - **Fulfillment Handler**: the standard four-step fulfillment pipeline
//!
//! ## Example
//!
//! ```ignore
//! use order_queue_runtime::{FulfillmentHandler, InMemoryQueue, OrderProcessor, OrderQueueService};
//! use order_queue_runtime::config::ProcessorConfig;
//! use order_queue_runtime::shutdown;
//!
//! let service = Arc::new(OrderQueueService::new(Arc::new(InMemoryQueue::new())));
//! let processor = OrderProcessor::new(
//!     Arc::clone(&service),
//!     Arc::new(FulfillmentHandler::default()),
//!     ProcessorConfig::default(),
//! );
//!
//! let (trigger, signal) = shutdown::channel();
//! let worker = tokio::spawn(async move { processor.run(signal).await });
//!
//! service.send_order(&order).await?;
//! // ...
//! trigger.trigger();
//! worker.await?;
//! ```

/// Environment-driven configuration
pub mod config;

/// Fulfillment steps and the default handler
pub mod fulfillment;

/// Ephemeral in-process queue backend
pub mod memory;

/// Prometheus metrics for observability
pub mod metrics;

/// The order consumer loop
pub mod processor;

/// Retry logic with exponential backoff
pub mod retry;

/// Backend-agnostic queue façade
pub mod service;

/// Cooperative shutdown
pub mod shutdown;

pub use config::{ConfigError, OrderQueueConfig, ProcessorConfig};
pub use fulfillment::{FulfillmentHandler, FulfillmentStep, SimulatedStep};
pub use memory::InMemoryQueue;
pub use processor::{IterationOutcome, OrderProcessor, ProcessorState, ProcessorStats};
pub use retry::RetryPolicy;
pub use service::{OrderQueueService, ReceiveOutcome};
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
