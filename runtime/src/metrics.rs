//! Prometheus metrics for the queue façade and the processor loop.
//!
//! # Example
//!
//! ```rust,no_run
//! use order_queue_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
    /// No Tokio runtime to run the HTTP listener on
    #[error("Metrics server must be started inside a Tokio runtime")]
    NoRuntime,
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and spawn the HTTP listener on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a Tokio runtime or when the exporter
    /// cannot be built.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and returns `Ok` without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| MetricsError::NoRuntime)?;

        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                let addr = self.addr;
                runtime.spawn(async move {
                    if exporter.await.is_err() {
                        tracing::error!(addr = %addr, "Metrics listener stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!("order_queue_sent_total", "Orders handed to the queue backend");
    describe_counter!("order_queue_send_errors_total", "Sends that failed after retries");
    describe_histogram!("order_queue_send_duration_seconds", "Time taken to send one order");
    describe_counter!("order_queue_received_total", "Messages received from the backend");
    describe_counter!("order_queue_receive_timeouts_total", "Receives that returned nothing");
    describe_counter!("order_queue_receive_errors_total", "Receives that failed");
    describe_gauge!("order_queue_approximate_count", "Last reported number of available messages");

    describe_counter!("order_processor_completed_total", "Orders handled and completed");
    describe_counter!("order_processor_abandoned_total", "Orders released for redelivery");
    describe_counter!("order_processor_dead_lettered_total", "Messages moved to the dead-letter channel");
    describe_counter!("order_processor_settle_errors_total", "Settlement calls that failed");
    describe_counter!("order_processor_lock_renewals_total", "Successful lease renewals");
    describe_histogram!("order_processor_handle_duration_seconds", "Time spent in the order handler");
}

/// Queue façade metrics recorder.
pub struct QueueMetrics;

impl QueueMetrics {
    /// Record a successful send.
    pub fn record_send(backend: &'static str, duration: Duration) {
        counter!("order_queue_sent_total", "backend" => backend).increment(1);
        histogram!("order_queue_send_duration_seconds", "backend" => backend)
            .record(duration.as_secs_f64());
    }

    /// Record a failed send.
    pub fn record_send_error(backend: &'static str) {
        counter!("order_queue_send_errors_total", "backend" => backend).increment(1);
    }

    /// Record a received message.
    pub fn record_receive(backend: &'static str) {
        counter!("order_queue_received_total", "backend" => backend).increment(1);
    }

    /// Record an empty receive.
    pub fn record_receive_timeout(backend: &'static str) {
        counter!("order_queue_receive_timeouts_total", "backend" => backend).increment(1);
    }

    /// Record a failed receive.
    pub fn record_receive_error(backend: &'static str) {
        counter!("order_queue_receive_errors_total", "backend" => backend).increment(1);
    }

    /// Record the advisory queue depth.
    #[allow(clippy::cast_precision_loss)] // Gauge values are f64
    pub fn record_approximate_count(backend: &'static str, count: u64) {
        gauge!("order_queue_approximate_count", "backend" => backend).set(count as f64);
    }
}

/// Processor loop metrics recorder.
pub struct ProcessorMetrics;

impl ProcessorMetrics {
    /// Record a completed order and its handling time.
    pub fn record_completed(duration: Duration) {
        counter!("order_processor_completed_total").increment(1);
        histogram!("order_processor_handle_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an abandoned order.
    pub fn record_abandoned() {
        counter!("order_processor_abandoned_total").increment(1);
    }

    /// Record a dead-lettered message.
    pub fn record_dead_lettered(reason: &str) {
        counter!("order_processor_dead_lettered_total", "reason" => reason.to_string()).increment(1);
    }

    /// Record a failed settlement call.
    pub fn record_settle_error(settlement: &'static str) {
        counter!("order_processor_settle_errors_total", "settlement" => settlement).increment(1);
    }

    /// Record a successful lease renewal.
    pub fn record_lock_renewal() {
        counter!("order_processor_lock_renewals_total").increment(1);
    }
}
