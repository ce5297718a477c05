//! Integration tests for the file-backed queue.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use order_queue_core::message::{DeadLetterReason, OutboundMessage};
use order_queue_core::queue::{QueueBackend, QueueError};
use order_queue_file::FileQueue;
use order_queue_runtime::config::ProcessorConfig;
use order_queue_runtime::{IterationOutcome, OrderProcessor, OrderQueueService};
use order_queue_testing::{RecordingHandler, fixtures};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn msg(id: &str) -> OutboundMessage {
    OutboundMessage::new(id, format!("{{\"id\":\"{id}\"}}").into_bytes())
}

async fn open(dir: &Path, lock: Duration) -> FileQueue {
    FileQueue::builder(dir)
        .lock_duration(lock)
        .poll_interval(Duration::from_millis(10))
        .open()
        .await
        .unwrap()
}

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn open_creates_directory_layout() {
    let dir = TempDir::new().unwrap();
    let _queue = open(dir.path(), Duration::from_secs(60)).await;
    for sub in ["tmp", "pending", "inflight", "deadletter", "index"] {
        assert!(dir.path().join(sub).is_dir(), "{sub} missing");
    }
}

#[tokio::test]
async fn zero_lock_duration_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let err = FileQueue::builder(dir.path())
        .lock_duration(Duration::ZERO)
        .open()
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Configuration(_)));
}

#[tokio::test]
async fn messages_come_out_in_send_order() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), Duration::from_secs(60)).await;
    for id in ["a", "b", "c"] {
        queue.send(msg(id)).await.unwrap();
    }
    assert_eq!(queue.approximate_count().await.unwrap(), Some(3));

    for id in ["a", "b", "c"] {
        let m = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(m.message_id, id);
        assert_eq!(m.delivery_count, 1);
        assert!(m.locked_until.is_some());
        queue.complete(&m).await.unwrap();
    }
    assert_eq!(files_in(&dir.path().join("pending")), 0);
    assert_eq!(files_in(&dir.path().join("inflight")), 0);
    assert_eq!(files_in(&dir.path().join("index")), 0);
}

#[tokio::test]
async fn receive_does_not_delete_the_file() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), Duration::from_secs(60)).await;
    queue.send(msg("a")).await.unwrap();

    let m = queue.receive(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(files_in(&dir.path().join("inflight")), 1);
    assert_eq!(m.body, br#"{"id":"a"}"#.to_vec());
    assert!(queue.receive(Duration::ZERO).await.unwrap().is_none());
}

#[tokio::test]
async fn empty_queue_times_out_with_none() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), Duration::from_secs(60)).await;
    let started = std::time::Instant::now();
    assert!(queue.receive(Duration::from_millis(100)).await.unwrap().is_none());
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn messages_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let queue = open(dir.path(), Duration::from_secs(60)).await;
        queue.send(msg("durable")).await.unwrap();
    }
    let queue = open(dir.path(), Duration::from_secs(60)).await;
    let m = queue.receive(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(m.message_id, "durable");
}

#[tokio::test]
async fn crashed_consumer_message_reappears_after_lease() {
    let dir = TempDir::new().unwrap();
    {
        let queue = open(dir.path(), Duration::from_millis(100)).await;
        queue.send(msg("a")).await.unwrap();
        let m = queue.receive(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(m.delivery_count, 1);
        // Dropped without settling
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    let queue = open(dir.path(), Duration::from_millis(100)).await;
    let m = queue.receive(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(m.message_id, "a");
    assert_eq!(m.delivery_count, 2);
}

#[tokio::test]
async fn settling_after_lease_expiry_reports_lock_lost() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), Duration::from_millis(50)).await;
    queue.send(msg("a")).await.unwrap();
    let m = queue.receive(Duration::ZERO).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(matches!(queue.complete(&m).await, Err(QueueError::LockLost(_))));
}

#[tokio::test]
async fn renew_lock_extends_the_lease() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), Duration::from_millis(200)).await;
    queue.send(msg("a")).await.unwrap();
    let m = queue.receive(Duration::ZERO).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    let renewed = queue.renew_lock(&m).await.unwrap().unwrap();
    assert!(renewed > m.locked_until.unwrap());
    tokio::time::sleep(Duration::from_millis(120)).await;
    queue.complete(&m).await.unwrap();
}

#[tokio::test]
async fn second_complete_reports_lock_lost() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), Duration::from_secs(60)).await;
    queue.send(msg("a")).await.unwrap();
    let m = queue.receive(Duration::ZERO).await.unwrap().unwrap();
    queue.complete(&m).await.unwrap();
    assert!(matches!(queue.complete(&m).await, Err(QueueError::LockLost(_))));
}

#[tokio::test]
async fn abandon_moves_message_behind_younger_ones() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), Duration::from_secs(60)).await;
    queue.send(msg("a")).await.unwrap();
    queue.send(msg("b")).await.unwrap();

    let first = queue.receive(Duration::ZERO).await.unwrap().unwrap();
    queue.abandon(&first).await.unwrap();

    let next = queue.receive(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(next.message_id, "b");
    let again = queue.receive(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(again.message_id, "a");
    assert_eq!(again.delivery_count, 2);
    assert!(matches!(queue.complete(&first).await, Err(QueueError::LockLost(_))));
}

#[tokio::test]
async fn dead_letter_parks_message_with_reason() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), Duration::from_secs(60)).await;
    queue.send(msg("bad")).await.unwrap();
    let m = queue.receive(Duration::ZERO).await.unwrap().unwrap();

    queue
        .dead_letter(&m, &DeadLetterReason::deserialization_error("expected value"))
        .await
        .unwrap();

    assert!(queue.receive(Duration::ZERO).await.unwrap().is_none());
    let parked = queue.dead_letters().await.unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].message_id, "bad");
    assert_eq!(parked[0].reason.reason, "deserialization-error");
    assert_eq!(parked[0].body, m.body);
}

#[tokio::test]
async fn duplicate_send_is_ignored_while_live() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), Duration::from_secs(60)).await;
    queue.send(msg("a")).await.unwrap();
    queue.send(msg("a")).await.unwrap();
    assert_eq!(queue.approximate_count().await.unwrap(), Some(1));

    let m = queue.receive(Duration::ZERO).await.unwrap().unwrap();
    queue.complete(&m).await.unwrap();

    // Once completed the id may be used again
    queue.send(msg("a")).await.unwrap();
    assert_eq!(queue.approximate_count().await.unwrap(), Some(1));
}

#[tokio::test]
async fn corrupt_file_is_quarantined() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), Duration::from_secs(60)).await;
    std::fs::write(
        dir.path().join("pending").join("00000000000000000000-0000000000-junk.json"),
        b"not an envelope",
    )
    .unwrap();
    queue.send(msg("good")).await.unwrap();

    let m = queue.receive(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(m.message_id, "good");
    assert_eq!(files_in(&dir.path().join("deadletter")), 1);
    // Unreadable files are skipped when listing
    assert!(queue.dead_letters().await.unwrap().is_empty());
}

/// Drain `queue` until it reports empty, completing every message.
fn drain(queue: Arc<FileQueue>) -> tokio::task::JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(m) = queue.receive(Duration::ZERO).await.unwrap() {
            queue.complete(&m).await.unwrap();
            seen.push(m.message_id);
        }
        seen
    })
}

fn delivery_counts(batches: impl IntoIterator<Item = Vec<String>>) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for id in batches.into_iter().flatten() {
        *counts.entry(id).or_insert(0) += 1;
    }
    counts
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_handles_never_claim_the_same_message() {
    let dir = TempDir::new().unwrap();
    let a = Arc::new(open(dir.path(), Duration::from_secs(1)).await);
    let b = Arc::new(open(dir.path(), Duration::from_secs(1)).await);
    for i in 0..200 {
        a.send(msg(&format!("m-{i}"))).await.unwrap();
    }
    // Pending files are now older than a whole lease
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let (left, right) = tokio::join!(drain(Arc::clone(&a)), drain(Arc::clone(&b)));
    let counts = delivery_counts([left.unwrap(), right.unwrap()]);
    assert_eq!(counts.len(), 200);
    for (id, seen) in &counts {
        assert_eq!(*seen, 1, "{id} delivered {seen} times");
    }
    assert_eq!(files_in(&dir.path().join("inflight")), 0);
    assert_eq!(files_in(&dir.path().join("pending")), 0);
}

#[tokio::test]
async fn opening_a_second_handle_leaves_live_claims_alone() {
    let dir = TempDir::new().unwrap();
    let worker = open(dir.path(), Duration::from_millis(300)).await;
    worker.send(msg("a")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let m = worker.receive(Duration::ZERO).await.unwrap().unwrap();
    let producer = open(dir.path(), Duration::from_millis(300)).await;
    assert_eq!(producer.recover().await.unwrap(), 0);
    assert!(producer.receive(Duration::ZERO).await.unwrap().is_none());
    worker.complete(&m).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_lose_nothing() {
    let dir = TempDir::new().unwrap();
    let mut producers = Vec::new();
    for p in 0..4 {
        let queue = open(dir.path(), Duration::from_secs(60)).await;
        producers.push(tokio::spawn(async move {
            for i in 0..25 {
                queue.send(msg(&format!("p{p}-o{i}"))).await.unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    let consumer = Arc::new(open(dir.path(), Duration::from_secs(60)).await);
    assert_eq!(consumer.approximate_count().await.unwrap(), Some(100));
    let counts = delivery_counts([drain(consumer).await.unwrap()]);
    assert_eq!(counts.len(), 100);
    assert!(counts.values().all(|seen| *seen == 1));
    assert_eq!(files_in(&dir.path().join("index")), 0);
}

#[tokio::test]
async fn marker_without_a_message_does_not_block_a_resend() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), Duration::from_secs(60)).await;
    // Left by a producer that died before its message reached pending/
    std::fs::write(dir.path().join("index").join("order-42"), b"").unwrap();

    queue.send(msg("order-42")).await.unwrap();
    assert_eq!(queue.approximate_count().await.unwrap(), Some(1));
    let m = queue.receive(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(m.message_id, "order-42");

    // The id is live again, so a further resend is a duplicate
    queue.send(msg("order-42")).await.unwrap();
    assert_eq!(queue.approximate_count().await.unwrap(), Some(0));
    queue.complete(&m).await.unwrap();
}

#[tokio::test]
async fn closed_queue_rejects_operations() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path(), Duration::from_secs(60)).await;
    queue.close().await.unwrap();
    assert_eq!(queue.send(msg("a")).await, Err(QueueError::Closed));
    assert!(matches!(queue.receive(Duration::ZERO).await, Err(QueueError::Closed)));
}

#[tokio::test]
async fn processor_completes_orders_from_disk() {
    let dir = TempDir::new().unwrap();
    let queue: Arc<dyn QueueBackend> = Arc::new(open(dir.path(), Duration::from_secs(60)).await);
    let service = Arc::new(OrderQueueService::new(queue));
    let handler = Arc::new(RecordingHandler::new());
    let processor = OrderProcessor::new(
        Arc::clone(&service),
        handler.clone(),
        ProcessorConfig {
            receive_timeout_ms: 50,
            ..ProcessorConfig::default()
        },
    );

    let order = fixtures::sample_order();
    service.send_order(&order).await.unwrap();
    assert_eq!(processor.process_next().await, IterationOutcome::Completed);
    assert_eq!(handler.handled(), vec![order.order_id().clone()]);
    assert_eq!(files_in(&dir.path().join("inflight")), 0);
}
