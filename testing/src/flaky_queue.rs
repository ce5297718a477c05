//! Fault injection for queue backends.

use order_queue_core::message::{DeadLetterReason, OutboundMessage, ReceivedMessage};
use order_queue_core::queue::{QueueBackend, QueueError, QueueFuture};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Wraps a backend and fails a scripted number of calls with
/// [`QueueError::Unavailable`] before delegating.
///
/// # Example
///
/// ```ignore
/// let queue = FlakyQueue::new(InMemoryQueue::new());
/// queue.fail_next_sends(2);
/// // the first two sends fail, the third reaches the inner queue
/// ```
#[derive(Debug)]
pub struct FlakyQueue<B> {
    inner: B,
    send_failures: AtomicU32,
    receive_failures: AtomicU32,
    complete_failures: AtomicU32,
}

impl<B: QueueBackend> FlakyQueue<B> {
    /// Wrap `inner` with no failures scheduled.
    #[must_use]
    pub const fn new(inner: B) -> Self {
        Self {
            inner,
            send_failures: AtomicU32::new(0),
            receive_failures: AtomicU32::new(0),
            complete_failures: AtomicU32::new(0),
        }
    }

    /// The wrapped backend.
    #[must_use]
    pub const fn inner(&self) -> &B {
        &self.inner
    }

    /// Fail the next `count` sends.
    pub fn fail_next_sends(&self, count: u32) {
        self.send_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` receives.
    pub fn fail_next_receives(&self, count: u32) {
        self.receive_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` completes.
    pub fn fail_next_completes(&self, count: u32) {
        self.complete_failures.store(count, Ordering::SeqCst);
    }
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn injected(operation: &str) -> QueueError {
    QueueError::Unavailable(format!("injected {operation} failure"))
}

impl<B: QueueBackend> QueueBackend for FlakyQueue<B> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn send(&self, message: OutboundMessage) -> QueueFuture<'_, ()> {
        if take(&self.send_failures) {
            return Box::pin(async { Err(injected("send")) });
        }
        self.inner.send(message)
    }

    fn receive(&self, timeout: Duration) -> QueueFuture<'_, Option<ReceivedMessage>> {
        if take(&self.receive_failures) {
            return Box::pin(async { Err(injected("receive")) });
        }
        self.inner.receive(timeout)
    }

    fn complete<'a>(&'a self, message: &'a ReceivedMessage) -> QueueFuture<'a, ()> {
        if take(&self.complete_failures) {
            return Box::pin(async { Err(injected("complete")) });
        }
        self.inner.complete(message)
    }

    fn abandon<'a>(&'a self, message: &'a ReceivedMessage) -> QueueFuture<'a, ()> {
        self.inner.abandon(message)
    }

    fn dead_letter<'a>(
        &'a self,
        message: &'a ReceivedMessage,
        reason: &'a DeadLetterReason,
    ) -> QueueFuture<'a, ()> {
        self.inner.dead_letter(message, reason)
    }

    fn renew_lock<'a>(
        &'a self,
        message: &'a ReceivedMessage,
    ) -> QueueFuture<'a, Option<chrono::DateTime<chrono::Utc>>> {
        self.inner.renew_lock(message)
    }

    fn approximate_count(&self) -> QueueFuture<'_, Option<u64>> {
        self.inner.approximate_count()
    }

    fn close(&self) -> QueueFuture<'_, ()> {
        self.inner.close()
    }
}
