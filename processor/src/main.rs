//! Order processor worker.
//!
//! Receives orders from the configured queue, runs fulfillment for each and
//! acknowledges it, until Ctrl+C or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! # Durable file queue shared with `place-order`
//! ORDER_QUEUE_BACKEND=file ORDER_QUEUE_PATH=/var/lib/orders cargo run --bin order-processor
//!
//! # Service Bus
//! ORDER_QUEUE_BACKEND=servicebus \
//! SERVICEBUS_CONNECTION_STRING='Endpoint=sb://…' \
//!   cargo run --bin order-processor
//! ```
//!
//! With the in-memory backend a few demo orders are enqueued at startup so the
//! loop has something to do.

use anyhow::Context;
use order_processor::demo::{demo_catalog, demo_orders};
use order_queue_core::environment::SystemClock;
use order_queue_runtime::config::BackendKind;
use order_queue_runtime::metrics::MetricsServer;
use order_queue_runtime::{FulfillmentHandler, OrderProcessor, OrderQueueConfig, shutdown};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

const MEMORY_DEMO_ORDERS: usize = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OrderQueueConfig::from_env().context("invalid configuration")?;
    order_processor::init_tracing(&config.observability.log_level);

    info!(
        environment = %config.environment,
        backend = %config.queue.backend,
        "Starting order processor"
    );

    let _metrics = match config.observability.metrics_port {
        Some(port) => {
            let mut server = MetricsServer::new(SocketAddr::from(([0, 0, 0, 0], port)));
            server.start().context("failed to start metrics listener")?;
            Some(server)
        }
        None => None,
    };

    let service = order_processor::connect_service(&config.queue)
        .await
        .context("failed to open the order queue")?;

    if config.queue.backend == BackendKind::Memory {
        for order in demo_orders(&demo_catalog(), MEMORY_DEMO_ORDERS, &SystemClock)? {
            service.send_order(&order).await?;
        }
        info!(count = MEMORY_DEMO_ORDERS, "Seeded demo orders");
    }

    let processor = OrderProcessor::new(
        Arc::clone(&service),
        Arc::new(FulfillmentHandler::default()),
        config.processor.clone(),
    );

    let (trigger, signal) = shutdown::channel();
    let worker = tokio::spawn(async move { processor.run(signal).await });

    info!("Press Ctrl+C to stop");
    if let Err(e) = shutdown::wait_for_signal().await {
        warn!(error = %e, "Signal handling failed, stopping");
    }
    trigger.trigger();

    match shutdown::join_with_timeout(worker, config.processor.shutdown_timeout()).await {
        Ok(stats) => info!(
            received = stats.received,
            completed = stats.completed,
            abandoned = stats.abandoned,
            dead_lettered = stats.dead_lettered,
            "Processor drained"
        ),
        Err(e) => error!(error = %e, "Processor did not stop cleanly"),
    }

    service.close().await.context("failed to close the order queue")?;
    info!("Order processor stopped");
    Ok(())
}
