use order_queue_core::queue::{QueueBackend, QueueError};
use order_queue_file::FileQueue;
use order_queue_runtime::config::{BackendKind, QueueConfig};
use order_queue_runtime::{InMemoryQueue, OrderQueueService};
use order_queue_servicebus::ServiceBusQueue;
use std::sync::Arc;

/// Open the backend named by `config`.
///
/// # Errors
///
/// Returns [`QueueError::Configuration`] when the selected backend is missing
/// its target (no path, no connection string), or any error raised while
/// opening it.
pub async fn connect(config: &QueueConfig) -> Result<Arc<dyn QueueBackend>, QueueError> {
    let backend: Arc<dyn QueueBackend> = match config.backend {
        BackendKind::Memory => {
            tracing::warn!("Using the in-memory queue: orders do not outlive this process");
            Arc::new(InMemoryQueue::new())
        }
        BackendKind::File => {
            let path = config
                .file
                .path
                .clone()
                .ok_or_else(|| QueueError::Configuration("ORDER_QUEUE_PATH is required".into()))?;
            Arc::new(
                FileQueue::builder(path)
                    .lock_duration(config.file.lock_duration())
                    .poll_interval(config.file.poll_interval())
                    .open()
                    .await?,
            )
        }
        BackendKind::ServiceBus => {
            let sb = &config.service_bus;
            let connection_string = sb.connection_string.clone().ok_or_else(|| {
                QueueError::Configuration("SERVICEBUS_CONNECTION_STRING is required".into())
            })?;
            let mut builder = ServiceBusQueue::builder()
                .connection_string(connection_string)
                .queue_name(sb.queue_name.clone())
                .request_timeout(sb.request_timeout());
            if let Some(dlq) = &sb.dead_letter_queue {
                builder = builder.dead_letter_queue(dlq.clone());
            }
            Arc::new(builder.build()?)
        }
    };

    tracing::info!(backend = backend.name(), "Queue backend ready");
    Ok(backend)
}

/// Open the configured backend and wrap it in an [`OrderQueueService`].
///
/// # Errors
///
/// Same as [`connect`].
pub async fn connect_service(config: &QueueConfig) -> Result<Arc<OrderQueueService>, QueueError> {
    let backend = connect(config).await?;
    Ok(Arc::new(OrderQueueService::builder().backend(backend).build()?))
}
