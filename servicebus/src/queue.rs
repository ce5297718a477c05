//! Peek-lock queue client over the Service Bus REST API.

use crate::connection::{ConnectionString, sas_token};
use chrono::{DateTime, Utc};
use order_queue_core::message::{DeadLetterReason, LockToken, OutboundMessage, ReceivedMessage};
use order_queue_core::queue::{QueueBackend, QueueError, QueueFuture};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Header carrying system properties as JSON.
const BROKER_PROPERTIES: &str = "BrokerProperties";

/// Lifetime of each generated SAS token.
const TOKEN_TTL_SECS: i64 = 3_600;

/// Application property naming the dead-letter reason on forwarded messages.
pub const DEAD_LETTER_REASON_PROPERTY: &str = "DeadLetterReason";

/// Application property carrying the dead-letter description on forwarded messages.
pub const DEAD_LETTER_DESCRIPTION_PROPERTY: &str = "DeadLetterErrorDescription";

/// Headers that are never application properties.
const RESERVED_HEADERS: &[&str] = &[
    "brokerproperties",
    "content-type",
    "content-length",
    "date",
    "location",
    "server",
    "strict-transport-security",
    "transfer-encoding",
];

/// System properties sent with a message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct OutgoingBrokerProperties<'a> {
    message_id: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    label: &'a str,
}

/// System properties returned by a peek-lock receive.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IncomingBrokerProperties {
    #[serde(default)]
    delivery_count: u32,
    lock_token: Option<String>,
    locked_until_utc: Option<String>,
    message_id: Option<String>,
    sequence_number: Option<i64>,
    enqueued_time_utc: Option<String>,
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn lease_expiry(lock_duration: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(lock_duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(now)
}

fn transport_error(e: &reqwest::Error) -> QueueError {
    if e.is_timeout() {
        QueueError::Timeout(e.to_string())
    } else {
        QueueError::Unavailable(e.to_string())
    }
}

/// Which call a status code came back from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Send,
    Receive,
    Settle,
}

/// Map an unexpected status to a queue error.
fn status_error(call: Call, status: StatusCode, body: &str) -> QueueError {
    let detail = format!("Service Bus returned {status}: {body}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => QueueError::Configuration(detail),
        StatusCode::NOT_FOUND | StatusCode::GONE if call == Call::Settle => {
            QueueError::LockLost(detail)
        }
        StatusCode::NOT_FOUND => QueueError::Configuration(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            QueueError::Unavailable(detail)
        }
        s if s.is_server_error() => QueueError::Unavailable(detail),
        _ => QueueError::Other(detail),
    }
}

/// Application properties to HTTP headers. String values are sent quoted.
fn property_headers(properties: &BTreeMap<String, String>) -> Result<HeaderMap, QueueError> {
    let mut headers = HeaderMap::new();
    for (name, value) in properties {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| QueueError::Serialization(format!("invalid property name '{name}': {e}")))?;
        let quoted = serde_json::to_string(value)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        let value = HeaderValue::from_str(&quoted)
            .map_err(|e| QueueError::Serialization(format!("invalid value for '{name}': {e}")))?;
        headers.insert(header, value);
    }
    Ok(headers)
}

/// Quoted response headers back to application properties.
fn properties_from_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| !RESERVED_HEADERS.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            let text = value.to_str().ok()?;
            let unquoted: String = serde_json::from_str(text).ok()?;
            Some((name.as_str().to_string(), unquoted))
        })
        .collect()
}

/// Service Bus queue backend.
///
/// Receives use peek-lock: the message stays on the broker, locked for the
/// queue's lock duration, until it is completed, abandoned or the lock expires.
pub struct ServiceBusQueue {
    client: Client,
    connection: ConnectionString,
    endpoint: String,
    queue_name: String,
    dead_letter_queue: String,
    request_timeout: Duration,
    lock_duration: Duration,
    closed: AtomicBool,
}

impl std::fmt::Debug for ServiceBusQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBusQueue")
            .field("endpoint", &self.endpoint)
            .field("queue_name", &self.queue_name)
            .field("dead_letter_queue", &self.dead_letter_queue)
            .finish_non_exhaustive()
    }
}

impl ServiceBusQueue {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> ServiceBusQueueBuilder {
        ServiceBusQueueBuilder::default()
    }

    /// Queue messages are sent to and received from.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Side queue receiving dead-lettered messages.
    #[must_use]
    pub fn dead_letter_queue(&self) -> &str {
        &self.dead_letter_queue
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }

    fn entity_url(&self, entity: &str) -> String {
        format!("{}/{entity}", self.endpoint)
    }

    fn authorize(&self, request: RequestBuilder, entity: &str) -> Result<RequestBuilder, QueueError> {
        // Tokens are signed for the public namespace URI even when requests go
        // to an overridden endpoint.
        let resource = format!("{}/{entity}", self.connection.endpoint);
        let token = sas_token(
            &resource,
            &self.connection.key_name,
            &self.connection.key,
            Utc::now().timestamp() + TOKEN_TTL_SECS,
        )?;
        Ok(request.header(reqwest::header::AUTHORIZATION, token))
    }

    /// URL of a locked message, from the settle handle in its lock token.
    fn locked_message_url(&self, token: &LockToken) -> String {
        format!("{}/messages/{}", self.entity_url(&self.queue_name), token.as_str())
    }

    async fn post_message(&self, entity: &str, message: &OutboundMessage) -> Result<(), QueueError> {
        let broker = serde_json::to_string(&OutgoingBrokerProperties {
            message_id: &message.message_id,
            label: &message.subject,
        })
        .map_err(|e| QueueError::Serialization(e.to_string()))?;

        let request = self
            .client
            .post(format!("{}/messages", self.entity_url(entity)))
            .timeout(self.request_timeout)
            .header(BROKER_PROPERTIES, broker)
            .header(reqwest::header::CONTENT_TYPE, &message.content_type)
            .headers(property_headers(&message.properties)?)
            .body(message.body.clone());
        let response = self
            .authorize(request, entity)?
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(status_error(Call::Send, status, &body))
            }
        }
    }

    async fn read_locked_message(&self, response: Response) -> Result<ReceivedMessage, QueueError> {
        let headers = response.headers().clone();
        let broker: IncomingBrokerProperties = headers
            .get(BROKER_PROPERTIES)
            .and_then(|v| v.to_str().ok())
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| QueueError::Serialization(format!("invalid BrokerProperties: {e}")))?
            .unwrap_or_default();

        let lock = broker
            .lock_token
            .ok_or_else(|| QueueError::Other("peek-lock response has no LockToken".into()))?;
        let message_id = broker.message_id.unwrap_or_default();
        // Settle by sequence number when the broker reports one, else by message id
        let handle = broker.sequence_number.map_or_else(
            || urlencoding::encode(&message_id).into_owned(),
            |seq| seq.to_string(),
        );

        let body = response.bytes().await.map_err(|e| transport_error(&e))?;
        Ok(ReceivedMessage {
            message_id,
            body: body.to_vec(),
            properties: properties_from_headers(&headers),
            delivery_count: broker.delivery_count.max(1),
            enqueued_at: broker
                .enqueued_time_utc
                .as_deref()
                .and_then(parse_http_date)
                .unwrap_or_else(Utc::now),
            locked_until: broker
                .locked_until_utc
                .as_deref()
                .and_then(parse_http_date)
                .or_else(|| Some(lease_expiry(self.lock_duration))),
            lock_token: LockToken::new(format!("{handle}/{lock}")),
        })
    }

    async fn settle(&self, method: reqwest::Method, message: &ReceivedMessage) -> Result<Response, QueueError> {
        self.ensure_open()?;
        let request = self
            .client
            .request(method, self.locked_message_url(&message.lock_token))
            .timeout(self.request_timeout)
            .header(reqwest::header::CONTENT_LENGTH, 0);
        let response = self
            .authorize(request, &self.queue_name)?
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(status_error(Call::Settle, status, &body))
        }
    }
}

impl QueueBackend for ServiceBusQueue {
    fn name(&self) -> &'static str {
        "servicebus"
    }

    fn send(&self, message: OutboundMessage) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            self.post_message(&self.queue_name, &message).await
        })
    }

    fn receive(&self, timeout: Duration) -> QueueFuture<'_, Option<ReceivedMessage>> {
        Box::pin(async move {
            self.ensure_open()?;
            let wait_secs = timeout.as_millis().div_ceil(1_000);
            let request = self
                .client
                .post(format!(
                    "{}/messages/head?timeout={wait_secs}",
                    self.entity_url(&self.queue_name)
                ))
                .timeout(timeout.saturating_add(self.request_timeout))
                .header(reqwest::header::CONTENT_LENGTH, 0);
            let response = self
                .authorize(request, &self.queue_name)?
                .send()
                .await
                .map_err(|e| transport_error(&e))?;

            match response.status() {
                StatusCode::NO_CONTENT => Ok(None),
                StatusCode::CREATED | StatusCode::OK => {
                    self.read_locked_message(response).await.map(Some)
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    Err(status_error(Call::Receive, status, &body))
                }
            }
        })
    }

    fn complete<'a>(&'a self, message: &'a ReceivedMessage) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.settle(reqwest::Method::DELETE, message).await?;
            Ok(())
        })
    }

    fn abandon<'a>(&'a self, message: &'a ReceivedMessage) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.settle(reqwest::Method::PUT, message).await?;
            Ok(())
        })
    }

    fn dead_letter<'a>(
        &'a self,
        message: &'a ReceivedMessage,
        reason: &'a DeadLetterReason,
    ) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            let mut parked = OutboundMessage::new(message.message_id.clone(), message.body.clone())
                .with_property(DEAD_LETTER_REASON_PROPERTY, reason.reason.clone())
                .with_property(DEAD_LETTER_DESCRIPTION_PROPERTY, reason.description.clone())
                .with_property("DeliveryCount", message.delivery_count.to_string());
            for (name, value) in &message.properties {
                parked.properties.entry(name.clone()).or_insert_with(|| value.clone());
            }

            // Forward first so a failure leaves the original locked and retryable
            self.post_message(&self.dead_letter_queue, &parked).await?;
            self.settle(reqwest::Method::DELETE, message).await?;
            tracing::warn!(
                message_id = %message.message_id,
                reason = %reason,
                dead_letter_queue = %self.dead_letter_queue,
                "Message forwarded to dead-letter queue"
            );
            Ok(())
        })
    }

    fn renew_lock<'a>(
        &'a self,
        message: &'a ReceivedMessage,
    ) -> QueueFuture<'a, Option<DateTime<Utc>>> {
        Box::pin(async move {
            let response = self.settle(reqwest::Method::POST, message).await?;
            let reported = response
                .headers()
                .get(BROKER_PROPERTIES)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| serde_json::from_str::<IncomingBrokerProperties>(v).ok())
                .and_then(|b| b.locked_until_utc)
                .and_then(|v| parse_http_date(&v));
            Ok(Some(reported.unwrap_or_else(|| lease_expiry(self.lock_duration))))
        })
    }

    fn approximate_count(&self) -> QueueFuture<'_, Option<u64>> {
        Box::pin(async move {
            self.ensure_open()?;
            Ok(None)
        })
    }

    fn close(&self) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Builder for [`ServiceBusQueue`].
#[derive(Default)]
pub struct ServiceBusQueueBuilder {
    connection_string: Option<String>,
    queue_name: Option<String>,
    dead_letter_queue: Option<String>,
    endpoint: Option<String>,
    request_timeout: Option<Duration>,
    lock_duration: Option<Duration>,
}

impl ServiceBusQueueBuilder {
    /// Namespace connection string (required).
    #[must_use]
    pub fn connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = Some(connection_string.into());
        self
    }

    /// Queue name (default: the connection string's `EntityPath`).
    #[must_use]
    pub fn queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    /// Side queue for dead-lettered messages (default: `<queue>-deadletter`).
    #[must_use]
    pub fn dead_letter_queue(mut self, dead_letter_queue: impl Into<String>) -> Self {
        self.dead_letter_queue = Some(dead_letter_queue.into());
        self
    }

    /// Send requests to this base URL instead of the namespace endpoint.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Per-request timeout on top of any long-poll wait (default: 90 s).
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Lock duration configured on the queue, used when the broker does not
    /// report an expiry (default: 60 s).
    #[must_use]
    pub const fn lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = Some(lock_duration);
        self
    }

    /// Build the [`ServiceBusQueue`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Configuration`] if:
    /// - no connection string was set, or it cannot be parsed
    /// - neither a queue name nor an `EntityPath` is available
    /// - the HTTP client cannot be created
    pub fn build(self) -> Result<ServiceBusQueue, QueueError> {
        let connection: ConnectionString = self
            .connection_string
            .ok_or_else(|| QueueError::Configuration("connection string is required".into()))?
            .parse()?;
        let queue_name = self
            .queue_name
            .or_else(|| connection.entity_path.clone())
            .filter(|q| !q.is_empty())
            .ok_or_else(|| QueueError::Configuration("queue name is required".into()))?;
        let dead_letter_queue = self
            .dead_letter_queue
            .unwrap_or_else(|| format!("{queue_name}-deadletter"));
        let endpoint = self
            .endpoint
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or_else(|| connection.endpoint.clone());

        let client = Client::builder()
            .build()
            .map_err(|e| QueueError::Configuration(format!("cannot create HTTP client: {e}")))?;

        tracing::info!(
            endpoint = %endpoint,
            queue = %queue_name,
            dead_letter_queue = %dead_letter_queue,
            "ServiceBusQueue created successfully"
        );

        Ok(ServiceBusQueue {
            client,
            connection,
            endpoint,
            queue_name,
            dead_letter_queue,
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(90)),
            lock_duration: self.lock_duration.unwrap_or(Duration::from_secs(60)),
            closed: AtomicBool::new(false),
        })
    }
}
