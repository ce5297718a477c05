//! Order fulfillment as an ordered list of steps.
//!
//! [`FulfillmentHandler`] logs an order summary, then runs its steps strictly in
//! order, stopping at the first failure. The default pipeline simulates the four
//! storefront steps with fixed delays:
//!
//! | step | delay |
//! |---|---|
//! | Validating payment | 1000 ms |
//! | Updating inventory | 800 ms |
//! | Creating shipping label | 1200 ms |
//! | Sending confirmation email | 500 ms |

use order_queue_core::handler::{HandlerError, HandlerFuture, OrderHandler};
use order_queue_core::order::OrderRecord;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Boxed future returned by [`FulfillmentStep::run`].
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;

/// One stage of fulfillment.
pub trait FulfillmentStep: Send + Sync {
    /// Name shown in logs and errors.
    fn name(&self) -> &str;

    /// Run the step for `order`. The error string becomes the failure reason.
    fn run<'a>(&'a self, order: &'a OrderRecord) -> StepFuture<'a>;
}

/// A step that only waits.
#[derive(Debug, Clone)]
pub struct SimulatedStep {
    name: String,
    delay: Duration,
}

impl SimulatedStep {
    /// Create a step named `name` that takes `delay`.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

impl FulfillmentStep for SimulatedStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, _order: &'a OrderRecord) -> StepFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(())
        })
    }
}

/// The standard storefront steps.
#[must_use]
pub fn default_steps() -> Vec<Arc<dyn FulfillmentStep>> {
    vec![
        Arc::new(SimulatedStep::new("Validating payment", Duration::from_millis(1000))),
        Arc::new(SimulatedStep::new("Updating inventory", Duration::from_millis(800))),
        Arc::new(SimulatedStep::new("Creating shipping label", Duration::from_millis(1200))),
        Arc::new(SimulatedStep::new("Sending confirmation email", Duration::from_millis(500))),
    ]
}

/// [`OrderHandler`] that runs fulfillment steps in sequence.
#[derive(Clone)]
pub struct FulfillmentHandler {
    steps: Vec<Arc<dyn FulfillmentStep>>,
}

impl FulfillmentHandler {
    /// Handler running `steps` in the given order.
    #[must_use]
    pub fn new(steps: Vec<Arc<dyn FulfillmentStep>>) -> Self {
        Self { steps }
    }

    /// Step names in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

impl Default for FulfillmentHandler {
    fn default() -> Self {
        Self::new(default_steps())
    }
}

fn log_summary(order: &OrderRecord) {
    tracing::info!(
        order_id = %order.order_id(),
        order_date = %order.order_date().format("%Y-%m-%d %H:%M:%S"),
        session_id = order.customer_session_id(),
        "New order received"
    );
    for item in order.items() {
        tracing::info!(
            product = %item.product_name,
            sku = %item.sku,
            quantity = item.quantity,
            price = %item.price.round_dp(2),
            subtotal = %item.subtotal.round_dp(2),
            "Order item"
        );
    }
    tracing::info!(
        subtotal = %order.subtotal().round_dp(2),
        tax = %order.tax().round_dp(2),
        shipping = %order.shipping().round_dp(2),
        total = %order.total().round_dp(2),
        "Order totals"
    );
}

impl OrderHandler for FulfillmentHandler {
    fn handle<'a>(&'a self, order: &'a OrderRecord) -> HandlerFuture<'a> {
        let span = tracing::info_span!("fulfill_order", order_id = %order.order_id());
        Box::pin(
            async move {
                log_summary(order);

                for step in &self.steps {
                    let started = Instant::now();
                    tracing::info!(step = step.name(), "Step started");
                    step.run(order).await.map_err(|reason| HandlerError::StepFailed {
                        step: step.name().to_string(),
                        reason,
                    })?;
                    tracing::info!(
                        step = step.name(),
                        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                        "Step done"
                    );
                }

                tracing::info!("Order processed successfully");
                Ok(())
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::Utc;
    use order_queue_core::order::{OrderId, OrderItem, OrderTotals};
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl FulfillmentStep for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn run<'a>(&'a self, _order: &'a OrderRecord) -> StepFuture<'a> {
            Box::pin(async move {
                self.log.lock().unwrap().push(self.name);
                if self.fail {
                    Err("card declined".to_string())
                } else {
                    Ok(())
                }
            })
        }
    }

    fn order() -> OrderRecord {
        let items = vec![OrderItem::new(2, "4K Smart TV 55 inch", "ELEC-TV-002", Decimal::new(59_999, 2), 1)];
        let totals = OrderTotals::new(
            Decimal::new(59_999, 2),
            Decimal::new(4_800, 2),
            Decimal::ZERO,
            Decimal::new(64_799, 2),
        )
        .unwrap();
        OrderRecord::new(OrderId::generate(), Utc::now(), "s", items, totals).unwrap()
    }

    #[test]
    fn test_default_pipeline_order() {
        let handler = FulfillmentHandler::default();
        assert_eq!(
            handler.step_names(),
            vec![
                "Validating payment",
                "Updating inventory",
                "Creating shipping label",
                "Sending confirmation email"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_pipeline_takes_total_delay() {
        let started = tokio::time::Instant::now();
        FulfillmentHandler::default().handle(&order()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(3500));
    }

    #[tokio::test]
    async fn test_steps_stop_at_first_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let step = |name, fail| -> Arc<dyn FulfillmentStep> {
            Arc::new(Recording {
                name,
                log: Arc::clone(&log),
                fail,
            })
        };
        let handler = FulfillmentHandler::new(vec![
            step("payment", false),
            step("inventory", true),
            step("shipping", false),
        ]);

        let err = handler.handle(&order()).await.unwrap_err();
        assert_eq!(
            err,
            HandlerError::StepFailed {
                step: "inventory".to_string(),
                reason: "card declined".to_string()
            }
        );
        assert_eq!(*log.lock().unwrap(), vec!["payment", "inventory"]);
    }
}
