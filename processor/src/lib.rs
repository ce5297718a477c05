//! # Order Processor
//!
//! Wiring shared by the `order-processor` worker and the `place-order` demo
//! producer: backend selection from configuration, the demo catalog and
//! tracing setup.
//!
//! Both binaries read the same environment (see
//! [`order_queue_runtime::config`]), so a producer and a worker pointed at the
//! same `ORDER_QUEUE_PATH` or Service Bus queue talk to each other.

/// Backend selection
pub mod backend;

/// Seeded product catalog and demo carts
pub mod demo;

pub use backend::{connect, connect_service};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies to the order
/// queue crates and `warn` to everything else.
pub fn init_tracing(default_level: &str) {
    let fallback = format!(
        "warn,order_processor={default_level},order_queue_runtime={default_level},\
         order_queue_file={default_level},order_queue_servicebus={default_level},\
         place_order={default_level}"
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
