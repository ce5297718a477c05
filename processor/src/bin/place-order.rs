//! Demo checkout: builds carts from the seeded catalog and submits them as orders.
//!
//! ```bash
//! ORDER_QUEUE_BACKEND=file ORDER_QUEUE_PATH=/var/lib/orders cargo run --bin place-order -- 5
//! ```
//!
//! The optional argument is the number of orders to place (default 1).

use anyhow::{Context, bail};
use order_processor::demo::{demo_catalog, demo_orders};
use order_queue_core::environment::SystemClock;
use order_queue_runtime::OrderQueueConfig;
use order_queue_runtime::config::BackendKind;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let count = match std::env::args().nth(1) {
        Some(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("order count must be a number, got '{raw}'"))?,
        None => 1,
    };
    if count == 0 {
        bail!("order count must be at least 1");
    }

    let config = OrderQueueConfig::from_env().context("invalid configuration")?;
    order_processor::init_tracing(&config.observability.log_level);
    if config.queue.backend == BackendKind::Memory {
        warn!("The in-memory backend is private to this process; no worker will see these orders");
    }

    let service = order_processor::connect_service(&config.queue)
        .await
        .context("failed to open the order queue")?;

    let catalog = demo_catalog();
    for order in demo_orders(&catalog, count, &SystemClock)? {
        service
            .send_order(&order)
            .await
            .with_context(|| format!("failed to send order {}", order.order_id()))?;
        info!(
            order_id = %order.order_id(),
            items = order.items().len(),
            total = %order.total(),
            "Order placed"
        );
    }

    if let Ok(Some(depth)) = service.approximate_count().await {
        info!(depth, "Orders waiting in queue");
    }
    service.close().await?;
    Ok(())
}
