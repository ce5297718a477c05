//! The order consumer loop.
//!
//! # State machine
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//!  Idle ──▶ Receiving ──▶ Handling ──(settle)───────────┤
//!            │                                          │
//!            └──────────▶ TimedOut ─────────────────────┘
//!
//!  any state ──(shutdown between iterations)──▶ Stopped
//! ```
//!
//! For each received message:
//!
//! 1. decode the payload; a payload that does not decode is dead-lettered with
//!    reason `deserialization-error` and never reaches the handler
//! 2. run the handler, renewing the message lease meanwhile on backends that
//!    report one
//! 3. handler success → `complete`; handler failure → `abandon`, or dead-letter
//!    with reason `max-delivery-count-exceeded` once the redelivery cap is reached
//!
//! No error escapes an iteration. A failed receive backs off exponentially; a
//! failed settlement is logged and the message is left to the backend (it comes
//! back when its lease expires).

use crate::config::ProcessorConfig;
use crate::metrics::ProcessorMetrics;
use crate::retry::RetryPolicy;
use crate::service::{OrderQueueService, ReceiveOutcome};
use crate::shutdown::ShutdownSignal;
use chrono::Utc;
use order_queue_core::codec;
use order_queue_core::handler::{HandlerError, OrderHandler};
use order_queue_core::message::{DeadLetterReason, ReceivedMessage, Settlement};
use order_queue_core::order::OrderRecord;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::instrument;

/// Smallest interval between two lease renewals.
const MIN_RENEWAL_INTERVAL: Duration = Duration::from_millis(500);

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Between iterations
    Idle,
    /// Waiting for a message
    Receiving,
    /// Running the handler on a message
    Handling,
    /// The last receive returned nothing
    TimedOut,
    /// The loop has exited
    Stopped,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Receiving => "receiving",
            Self::Handling => "handling",
            Self::TimedOut => "timed-out",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Handled and completed
    Completed,
    /// Handler failed; released for redelivery
    Abandoned,
    /// Parked in the dead-letter channel with this reason
    DeadLettered(String),
    /// No message within the receive timeout
    TimedOut,
    /// The backend could not be polled
    Unavailable,
    /// Handling finished but the settlement call failed
    SettleFailed(Settlement),
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Messages received
    pub received: u64,
    /// Messages completed
    pub completed: u64,
    /// Messages abandoned
    pub abandoned: u64,
    /// Messages dead-lettered
    pub dead_lettered: u64,
    /// Empty receives
    pub timeouts: u64,
    /// Failed receives and failed settlements
    pub errors: u64,
}

impl ProcessorStats {
    fn record(&mut self, outcome: &IterationOutcome) {
        match outcome {
            IterationOutcome::Completed => {
                self.received += 1;
                self.completed += 1;
            }
            IterationOutcome::Abandoned => {
                self.received += 1;
                self.abandoned += 1;
            }
            IterationOutcome::DeadLettered(_) => {
                self.received += 1;
                self.dead_lettered += 1;
            }
            IterationOutcome::TimedOut => self.timeouts += 1,
            IterationOutcome::Unavailable => self.errors += 1,
            IterationOutcome::SettleFailed(_) => {
                self.received += 1;
                self.errors += 1;
            }
        }
    }
}

/// Long-running receive / handle / acknowledge loop.
pub struct OrderProcessor {
    service: Arc<OrderQueueService>,
    handler: Arc<dyn OrderHandler>,
    config: ProcessorConfig,
    backoff: RetryPolicy,
    state: watch::Sender<ProcessorState>,
}

impl OrderProcessor {
    /// Create a processor consuming from `service` and dispatching to `handler`.
    #[must_use]
    pub fn new(
        service: Arc<OrderQueueService>,
        handler: Arc<dyn OrderHandler>,
        config: ProcessorConfig,
    ) -> Self {
        let backoff = RetryPolicy::builder()
            .max_retries(usize::MAX)
            .initial_delay(Duration::from_millis(config.error_backoff_initial_ms))
            .max_delay(Duration::from_millis(config.error_backoff_max_ms))
            .multiplier(2.0)
            .jitter(true)
            .build();
        let (state, _) = watch::channel(ProcessorState::Idle);
        Self {
            service,
            handler,
            config,
            backoff,
            state,
        }
    }

    /// Current loop state.
    #[must_use]
    pub fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    /// Observe state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ProcessorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ProcessorState) {
        self.state.send_replace(state);
    }

    /// Run until `shutdown` fires.
    ///
    /// Shutdown is checked between iterations and while waiting for a message or
    /// backing off; a message being handled is always settled before the loop exits.
    #[instrument(skip_all, fields(backend = self.service.backend_name()))]
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> ProcessorStats {
        let mut stats = ProcessorStats::default();
        let mut consecutive_errors = 0_usize;

        tracing::info!(
            receive_timeout_ms = self.config.receive_timeout_ms,
            max_delivery_count = self.config.max_delivery_count,
            "Order processor started, waiting for orders"
        );

        while !shutdown.is_triggered() {
            self.set_state(ProcessorState::Receiving);
            let received = tokio::select! {
                biased;
                () = shutdown.triggered() => break,
                outcome = self.service.receive(self.config.receive_timeout()) => outcome,
            };

            let outcome = match received {
                ReceiveOutcome::Received(message) => {
                    consecutive_errors = 0;
                    self.handle_message(message).await
                }
                ReceiveOutcome::TimedOut => {
                    consecutive_errors = 0;
                    self.set_state(ProcessorState::TimedOut);
                    IterationOutcome::TimedOut
                }
                ReceiveOutcome::Unavailable(e) => {
                    let delay = self.backoff.delay_for_attempt(consecutive_errors);
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    tracing::warn!(
                        error = %e,
                        consecutive_errors,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Queue unavailable, backing off"
                    );
                    stats.record(&IterationOutcome::Unavailable);
                    tokio::select! {
                        biased;
                        () = shutdown.triggered() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                    self.set_state(ProcessorState::Idle);
                    continue;
                }
            };

            stats.record(&outcome);
            self.set_state(ProcessorState::Idle);
        }

        self.set_state(ProcessorState::Stopped);
        tracing::info!(
            completed = stats.completed,
            abandoned = stats.abandoned,
            dead_lettered = stats.dead_lettered,
            errors = stats.errors,
            "Order processor stopped"
        );
        stats
    }

    /// Run exactly one iteration: receive, then handle and settle if a message arrived.
    pub async fn process_next(&self) -> IterationOutcome {
        self.set_state(ProcessorState::Receiving);
        let outcome = match self.service.receive(self.config.receive_timeout()).await {
            ReceiveOutcome::Received(message) => self.handle_message(message).await,
            ReceiveOutcome::TimedOut => IterationOutcome::TimedOut,
            ReceiveOutcome::Unavailable(e) => {
                tracing::warn!(error = %e, "Queue unavailable");
                IterationOutcome::Unavailable
            }
        };
        self.set_state(ProcessorState::Idle);
        outcome
    }

    #[instrument(
        skip_all,
        fields(message_id = %message.message_id, delivery_count = message.delivery_count)
    )]
    async fn handle_message(&self, message: ReceivedMessage) -> IterationOutcome {
        self.set_state(ProcessorState::Handling);

        let order = match codec::decode_order(&message.body) {
            Ok(order) => order,
            Err(e) => {
                tracing::error!(error = %e, "Failed to deserialize message, dead-lettering");
                let reason = DeadLetterReason::deserialization_error(e.to_string());
                return self.dead_letter(&message, &reason).await;
            }
        };

        let started = Instant::now();
        match self.handle_with_renewal(&message, &order).await {
            Ok(()) => match self.service.complete(&message).await {
                Ok(()) => {
                    ProcessorMetrics::record_completed(started.elapsed());
                    tracing::info!(order_id = %order.order_id(), "Order completed");
                    IterationOutcome::Completed
                }
                Err(e) => {
                    ProcessorMetrics::record_settle_error(Settlement::Complete.as_str());
                    tracing::error!(order_id = %order.order_id(), error = %e, "Failed to complete message");
                    IterationOutcome::SettleFailed(Settlement::Complete)
                }
            },
            Err(e) => self.handler_failed(&message, &order, &e).await,
        }
    }

    async fn handler_failed(
        &self,
        message: &ReceivedMessage,
        order: &OrderRecord,
        error: &HandlerError,
    ) -> IterationOutcome {
        if self
            .config
            .delivery_cap()
            .is_some_and(|cap| message.delivery_count >= cap)
        {
            tracing::error!(
                order_id = %order.order_id(),
                error = %error,
                "Order failed on its final allowed delivery, dead-lettering"
            );
            let reason =
                DeadLetterReason::max_delivery_count_exceeded(message.delivery_count, &error.to_string());
            return self.dead_letter(message, &reason).await;
        }

        tracing::warn!(order_id = %order.order_id(), error = %error, "Order processing failed, abandoning");
        match self.service.abandon(message).await {
            Ok(()) => {
                ProcessorMetrics::record_abandoned();
                IterationOutcome::Abandoned
            }
            Err(e) => {
                ProcessorMetrics::record_settle_error(Settlement::Abandon.as_str());
                tracing::error!(error = %e, "Failed to abandon message");
                IterationOutcome::SettleFailed(Settlement::Abandon)
            }
        }
    }

    async fn dead_letter(&self, message: &ReceivedMessage, reason: &DeadLetterReason) -> IterationOutcome {
        match self.service.dead_letter(message, reason).await {
            Ok(()) => {
                ProcessorMetrics::record_dead_lettered(&reason.reason);
                IterationOutcome::DeadLettered(reason.reason.clone())
            }
            Err(e) => {
                ProcessorMetrics::record_settle_error(Settlement::DeadLetter.as_str());
                tracing::error!(error = %e, reason = %reason, "Failed to dead-letter message");
                IterationOutcome::SettleFailed(Settlement::DeadLetter)
            }
        }
    }

    /// Run the handler, renewing the lease at half its remaining time until the
    /// handler finishes or the renewal budget is spent.
    async fn handle_with_renewal(
        &self,
        message: &ReceivedMessage,
        order: &OrderRecord,
    ) -> Result<(), HandlerError> {
        let handling = self.handler.handle(order);
        tokio::pin!(handling);

        let budget = self.config.max_lock_renewal();
        let Some(mut locked_until) = message.locked_until else {
            return handling.await;
        };
        if budget.is_zero() {
            return handling.await;
        }

        let renew_until = tokio::time::Instant::now() + budget;
        loop {
            let remaining = (locked_until - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            let wait = (remaining / 2).max(MIN_RENEWAL_INTERVAL);
            if tokio::time::Instant::now() + wait > renew_until {
                tracing::debug!("Lock renewal budget spent");
                return handling.await;
            }

            tokio::select! {
                result = &mut handling => return result,
                () = tokio::time::sleep(wait) => {}
            }

            match self.service.renew_lock(message).await {
                Ok(Some(until)) => {
                    ProcessorMetrics::record_lock_renewal();
                    tracing::debug!(locked_until = %until, "Lock renewed");
                    locked_until = until;
                }
                Ok(None) => return handling.await,
                Err(e) => {
                    tracing::warn!(error = %e, "Lock renewal failed, message may be redelivered");
                    return handling.await;
                }
            }
        }
    }
}
