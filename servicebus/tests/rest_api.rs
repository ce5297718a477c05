//! Service Bus backend against a mock REST endpoint.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use order_queue_core::message::{DeadLetterReason, OutboundMessage};
use order_queue_core::queue::{QueueBackend, QueueError};
use order_queue_servicebus::ServiceBusQueue;
use std::time::Duration;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const CONN: &str = "Endpoint=sb://demo.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=c2VjcmV0LWtleQ==";

fn queue(server: &MockServer) -> ServiceBusQueue {
    ServiceBusQueue::builder()
        .connection_string(CONN)
        .queue_name("orders")
        .endpoint(server.uri())
        .request_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

fn locked_message() -> ResponseTemplate {
    ResponseTemplate::new(201)
        .insert_header(
            "BrokerProperties",
            r#"{"DeliveryCount":2,"LockToken":"lock-1","LockedUntilUtc":"Thu, 01 May 2025 09:31:00 GMT","MessageId":"o-1","SequenceNumber":7,"EnqueuedTimeUtc":"Thu, 01 May 2025 09:30:00 GMT"}"#,
        )
        .insert_header("Total", "\"108.00\"")
        .insert_header("Content-Type", "application/json")
        .set_body_bytes(br#"{"OrderId":"o-1"}"#.to_vec())
}

#[tokio::test]
async fn send_posts_body_with_broker_properties() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/messages"))
        .and(header_exists("authorization"))
        .and(|req: &Request| {
            // Compared whole: the JSON contains commas
            req.headers.get("BrokerProperties").and_then(|v| v.to_str().ok())
                == Some(r#"{"MessageId":"o-1","Label":"Order o-1"}"#)
        })
        .and(header("Total", "\"108.00\""))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let mut message = OutboundMessage::new("o-1", br#"{"OrderId":"o-1"}"#.to_vec())
        .with_subject("Order o-1")
        .with_property("Total", "108.00");
    message.content_type = "application/json".to_string();

    queue(&server).send(message).await.unwrap();
}

#[tokio::test]
async fn receive_maps_a_locked_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/messages/head"))
        .and(query_param("timeout", "2"))
        .respond_with(locked_message())
        .mount(&server)
        .await;

    let m = queue(&server)
        .receive(Duration::from_secs(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(m.message_id, "o-1");
    assert_eq!(m.delivery_count, 2);
    assert_eq!(m.body, br#"{"OrderId":"o-1"}"#.to_vec());
    assert_eq!(m.lock_token.as_str(), "7/lock-1");
    assert_eq!(m.properties.get("total").map(String::as_str), Some("108.00"));
    assert_eq!(
        m.locked_until.unwrap().to_rfc3339(),
        "2025-05-01T09:31:00+00:00"
    );
}

#[tokio::test]
async fn empty_receive_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/messages/head"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    assert!(queue(&server).receive(Duration::from_secs(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/messages/head"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = queue(&server).receive(Duration::from_secs(1)).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn unauthorized_is_a_configuration_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/messages"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = queue(&server)
        .send(OutboundMessage::new("o-1", b"{}".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Configuration(_)));
}

#[tokio::test]
async fn complete_and_abandon_use_the_lock_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/messages/head"))
        .respond_with(locked_message())
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/orders/messages/7/lock-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/orders/messages/7/lock-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let queue = queue(&server);
    let m = queue.receive(Duration::from_secs(1)).await.unwrap().unwrap();
    queue.abandon(&m).await.unwrap();
    queue.complete(&m).await.unwrap();
}

#[tokio::test]
async fn expired_lock_is_reported_as_lock_lost() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/messages/head"))
        .respond_with(locked_message())
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/orders/messages/7/lock-1"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let queue = queue(&server);
    let m = queue.receive(Duration::from_secs(1)).await.unwrap().unwrap();
    assert!(matches!(queue.complete(&m).await, Err(QueueError::LockLost(_))));
}

#[tokio::test]
async fn renew_lock_returns_a_future_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/messages/head"))
        .respond_with(locked_message())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/orders/messages/7/lock-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let queue = queue(&server);
    let m = queue.receive(Duration::from_secs(1)).await.unwrap().unwrap();
    let renewed = queue.renew_lock(&m).await.unwrap().unwrap();
    assert!(renewed > chrono::Utc::now());
}

#[tokio::test]
async fn dead_letter_forwards_then_completes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/messages/head"))
        .respond_with(locked_message())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/orders-deadletter/messages"))
        .and(header("DeadLetterReason", "\"deserialization-error\""))
        .and(header("DeliveryCount", "\"2\""))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/orders/messages/7/lock-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let queue = queue(&server);
    let m = queue.receive(Duration::from_secs(1)).await.unwrap().unwrap();
    queue
        .dead_letter(&m, &DeadLetterReason::deserialization_error("expected value"))
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_forward_leaves_original_locked() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/messages/head"))
        .respond_with(locked_message())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/orders-deadletter/messages"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/orders/messages/7/lock-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let queue = queue(&server);
    let m = queue.receive(Duration::from_secs(1)).await.unwrap().unwrap();
    let err = queue
        .dead_letter(&m, &DeadLetterReason::deserialization_error("expected value"))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn count_is_unknown_and_close_is_final() {
    let server = MockServer::start().await;
    let queue = queue(&server);
    assert_eq!(queue.approximate_count().await.unwrap(), None);
    queue.close().await.unwrap();
    assert_eq!(
        queue.send(OutboundMessage::new("o-1", b"{}".to_vec())).await,
        Err(QueueError::Closed)
    );
}
