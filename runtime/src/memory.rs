//! Ephemeral in-process queue.
//!
//! Messages live in memory and are lost when the process exits. Useful for local
//! development and as the reference implementation of the backend contract in tests.
//!
//! - FIFO for fresh messages; an abandoned message goes to the back of the queue
//! - optional visibility timeout: a held message returns after `lock_duration`
//! - duplicate detection on `message_id` while the message is held
//! - `receive` waits on a [`Notify`] so a send wakes a blocked receiver at once

use chrono::Utc;
use order_queue_core::message::{
    DeadLetterReason, DeadLetteredMessage, DeliveryState, LockToken, OutboundMessage,
    ReceivedMessage, Settlement,
};
use order_queue_core::queue::{QueueBackend, QueueError, QueueFuture};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    message: OutboundMessage,
    enqueued_at: chrono::DateTime<Utc>,
    delivery_count: u32,
    state: DeliveryState,
    lease_expires: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    order: VecDeque<u64>,
    entries: HashMap<u64, Entry>,
    live_ids: HashMap<String, u64>,
    dead_letters: Vec<DeadLetteredMessage>,
    next_seq: u64,
    closed: bool,
}

impl State {
    fn reclaim_expired(&mut self, now: Instant) {
        for (seq, entry) in &mut self.entries {
            if entry.lease_expires.is_some_and(|until| until <= now) {
                entry.state = DeliveryState::Available;
                entry.lease_expires = None;
                self.order.push_back(*seq);
                tracing::debug!(message_id = %entry.message.message_id, "Lease expired, message available again");
            }
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.entries.values().filter_map(|e| e.lease_expires).min()
    }

    fn take_next(&mut self, lock_duration: Option<Duration>) -> Option<ReceivedMessage> {
        while let Some(seq) = self.order.pop_front() {
            let Some(entry) = self.entries.get_mut(&seq) else {
                continue;
            };
            let locked_until = lock_duration.and_then(|d| {
                chrono::Duration::from_std(d).ok().map(|d| Utc::now() + d)
            });
            let Ok(next) = entry.state.lease(locked_until) else {
                continue;
            };
            entry.state = next;
            entry.delivery_count += 1;
            entry.lease_expires = lock_duration.map(|d| Instant::now() + d);

            return Some(ReceivedMessage {
                message_id: entry.message.message_id.clone(),
                body: entry.message.body.clone(),
                properties: entry.message.properties.clone(),
                delivery_count: entry.delivery_count,
                enqueued_at: entry.enqueued_at,
                locked_until,
                lock_token: LockToken::new(format!("{seq}.{}", entry.delivery_count)),
            });
        }
        None
    }

    /// Resolve a lock token to a held entry.
    fn held(&mut self, token: &LockToken) -> Result<(u64, &mut Entry), QueueError> {
        let lost = || QueueError::LockLost(format!("unknown or stale lock token {token}"));
        let (seq, generation) = token.as_str().split_once('.').ok_or_else(lost)?;
        let seq: u64 = seq.parse().map_err(|_| lost())?;
        let generation: u32 = generation.parse().map_err(|_| lost())?;

        let entry = self.entries.get_mut(&seq).ok_or_else(lost)?;
        if entry.delivery_count != generation {
            return Err(lost());
        }
        if entry.lease_expires.is_some_and(|until| until <= Instant::now()) {
            return Err(QueueError::LockLost(format!("lease expired for {token}")));
        }
        Ok((seq, entry))
    }

    /// Apply a settlement; terminal settlements return the removed entry.
    fn settle(&mut self, token: &LockToken, settlement: Settlement) -> Result<Option<Entry>, QueueError> {
        let (seq, entry) = self.held(token)?;
        let next = entry.state.settle(settlement)?;
        entry.state = next;
        entry.lease_expires = None;

        if next.is_terminal() {
            let removed = self.entries.remove(&seq).ok_or_else(|| {
                QueueError::Other(format!("entry {seq} vanished while settling"))
            })?;
            self.live_ids.remove(&removed.message.message_id);
            Ok(Some(removed))
        } else {
            self.order.push_back(seq);
            Ok(None)
        }
    }
}

/// In-process queue backend.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    state: Mutex<State>,
    notify: Notify,
    lock_duration: Option<Duration>,
}

impl InMemoryQueue {
    /// Create a queue without a visibility timeout: held messages stay held until settled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue whose held messages return after `lock_duration`.
    #[must_use]
    pub fn with_lock_duration(lock_duration: Duration) -> Self {
        Self {
            lock_duration: Some(lock_duration),
            ..Self::default()
        }
    }

    /// Messages parked by `dead_letter`, oldest first.
    pub async fn dead_letters(&self) -> Vec<DeadLetteredMessage> {
        self.state.lock().await.dead_letters.clone()
    }

    /// Messages not yet completed or dead-lettered, held ones included.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Whether nothing is queued or held.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl QueueBackend for InMemoryQueue {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn send(&self, message: OutboundMessage) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(QueueError::Closed);
            }
            if state.live_ids.contains_key(&message.message_id) {
                tracing::debug!(message_id = %message.message_id, "Duplicate message id, send ignored");
                return Ok(());
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.live_ids.insert(message.message_id.clone(), seq);
            state.entries.insert(
                seq,
                Entry {
                    message,
                    enqueued_at: Utc::now(),
                    delivery_count: 0,
                    state: DeliveryState::Available,
                    lease_expires: None,
                },
            );
            state.order.push_back(seq);
            drop(state);

            self.notify.notify_waiters();
            Ok(())
        })
    }

    fn receive(&self, timeout: Duration) -> QueueFuture<'_, Option<ReceivedMessage>> {
        Box::pin(async move {
            let deadline = Instant::now() + timeout;
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let wake_at = {
                    let mut state = self.state.lock().await;
                    if state.closed {
                        return Err(QueueError::Closed);
                    }
                    state.reclaim_expired(Instant::now());
                    if let Some(message) = state.take_next(self.lock_duration) {
                        return Ok(Some(message));
                    }
                    state.next_expiry().map_or(deadline, |expiry| expiry.min(deadline))
                };

                if Instant::now() >= deadline {
                    return Ok(None);
                }
                tokio::select! {
                    () = &mut notified => {}
                    () = tokio::time::sleep_until(wake_at) => {}
                }
            }
        })
    }

    fn complete<'a>(&'a self, message: &'a ReceivedMessage) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.state
                .lock()
                .await
                .settle(&message.lock_token, Settlement::Complete)?;
            Ok(())
        })
    }

    fn abandon<'a>(&'a self, message: &'a ReceivedMessage) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.state
                .lock()
                .await
                .settle(&message.lock_token, Settlement::Abandon)?;
            self.notify.notify_waiters();
            Ok(())
        })
    }

    fn dead_letter<'a>(
        &'a self,
        message: &'a ReceivedMessage,
        reason: &'a DeadLetterReason,
    ) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let entry = state
                .settle(&message.lock_token, Settlement::DeadLetter)?
                .ok_or_else(|| QueueError::Other("dead-letter did not remove the entry".into()))?;
            state.dead_letters.push(DeadLetteredMessage {
                message_id: entry.message.message_id,
                body: entry.message.body,
                delivery_count: entry.delivery_count,
                reason: reason.clone(),
                dead_lettered_at: Utc::now(),
            });
            Ok(())
        })
    }

    fn renew_lock<'a>(
        &'a self,
        message: &'a ReceivedMessage,
    ) -> QueueFuture<'a, Option<chrono::DateTime<Utc>>> {
        Box::pin(async move {
            let Some(lock_duration) = self.lock_duration else {
                return Ok(None);
            };
            let mut state = self.state.lock().await;
            let (_, entry) = state.held(&message.lock_token)?;
            let locked_until = chrono::Duration::from_std(lock_duration)
                .ok()
                .map(|d| Utc::now() + d);
            entry.lease_expires = Some(Instant::now() + lock_duration);
            entry.state = DeliveryState::InFlight { locked_until };
            Ok(locked_until)
        })
    }

    fn approximate_count(&self) -> QueueFuture<'_, Option<u64>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            if state.closed {
                return Err(QueueError::Closed);
            }
            let now = Instant::now();
            let available = state
                .entries
                .values()
                .filter(|e| {
                    e.state == DeliveryState::Available
                        || e.lease_expires.is_some_and(|until| until <= now)
                })
                .count();
            Ok(Some(u64::try_from(available).unwrap_or(u64::MAX)))
        })
    }

    fn close(&self) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            self.state.lock().await.closed = true;
            self.notify.notify_waiters();
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use std::sync::Arc;

    fn msg(id: &str) -> OutboundMessage {
        OutboundMessage::new(id, id.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_fifo_for_fresh_messages() {
        let queue = InMemoryQueue::new();
        for id in ["a", "b", "c"] {
            queue.send(msg(id)).await.unwrap();
        }
        for expected in ["a", "b", "c"] {
            let received = queue.receive(Duration::ZERO).await.unwrap().unwrap();
            assert_eq!(received.message_id, expected);
            queue.complete(&received).await.unwrap();
        }
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_second_complete_reports_lock_lost() {
        let queue = InMemoryQueue::new();
        queue.send(msg("a")).await.unwrap();
        let received = queue.receive(Duration::ZERO).await.unwrap().unwrap();

        queue.complete(&received).await.unwrap();
        let err = queue.complete(&received).await.unwrap_err();
        assert!(matches!(err, QueueError::LockLost(_)));
        assert!(queue.receive(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_abandon_redelivers_with_higher_count() {
        let queue = InMemoryQueue::new();
        queue.send(msg("a")).await.unwrap();
        queue.send(msg("b")).await.unwrap();

        let first = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.delivery_count, 1);
        queue.abandon(&first).await.unwrap();

        // Abandoned message goes behind younger ones.
        let next = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(next.message_id, "b");
        let again = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again.message_id, "a");
        assert_eq!(again.delivery_count, 2);

        // The old token no longer settles anything.
        assert!(queue.complete(&first).await.is_err());
        queue.complete(&again).await.unwrap();
    }

    #[tokio::test]
    async fn test_held_message_is_not_received_twice() {
        let queue = InMemoryQueue::new();
        queue.send(msg("a")).await.unwrap();
        let _held = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        assert!(queue.receive(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_send_is_ignored_while_held() {
        let queue = InMemoryQueue::new();
        queue.send(msg("a")).await.unwrap();
        queue.send(msg("a")).await.unwrap();
        assert_eq!(queue.len().await, 1);

        let received = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        queue.complete(&received).await.unwrap();

        // Once completed the id may be reused.
        queue.send(msg("a")).await.unwrap();
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_parks_message() {
        let queue = InMemoryQueue::new();
        queue.send(msg("poison")).await.unwrap();
        let received = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        queue
            .dead_letter(&received, &DeadLetterReason::deserialization_error("bad json"))
            .await
            .unwrap();

        let parked = queue.dead_letters().await;
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].message_id, "poison");
        assert_eq!(parked[0].reason.reason, "deserialization-error");
        assert!(queue.receive(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out_without_error() {
        let queue = InMemoryQueue::new();
        let started = Instant::now();
        assert!(queue.receive(Duration::from_secs(2)).await.unwrap().is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_wakes_blocked_receiver() {
        let queue = Arc::new(InMemoryQueue::new());
        let receiver = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.receive(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        queue.send(msg("late")).await.unwrap();

        let received = receiver.await.unwrap().unwrap().unwrap();
        assert_eq!(received.message_id, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_returns_message() {
        let queue = InMemoryQueue::with_lock_duration(Duration::from_secs(10));
        queue.send(msg("a")).await.unwrap();
        let first = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        assert!(first.locked_until.is_some());

        let again = queue.receive(Duration::from_secs(15)).await.unwrap().unwrap();
        assert_eq!(again.message_id, "a");
        assert_eq!(again.delivery_count, 2);
        assert!(matches!(queue.complete(&first).await, Err(QueueError::LockLost(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_lock_extends_lease() {
        let queue = InMemoryQueue::with_lock_duration(Duration::from_secs(10));
        queue.send(msg("a")).await.unwrap();
        let held = queue.receive(Duration::ZERO).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(queue.renew_lock(&held).await.unwrap().is_some());
        tokio::time::sleep(Duration::from_secs(8)).await;

        assert!(queue.receive(Duration::ZERO).await.unwrap().is_none());
        queue.complete(&held).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_operations() {
        let queue = InMemoryQueue::new();
        queue.close().await.unwrap();
        assert_eq!(queue.send(msg("a")).await, Err(QueueError::Closed));
        assert_eq!(queue.receive(Duration::ZERO).await, Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_approximate_count() {
        let queue = InMemoryQueue::new();
        queue.send(msg("a")).await.unwrap();
        queue.send(msg("b")).await.unwrap();
        assert_eq!(queue.approximate_count().await.unwrap(), Some(2));
        let _held = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(queue.approximate_count().await.unwrap(), Some(1));
    }
}
