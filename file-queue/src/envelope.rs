//! On-disk message format.
//!
//! Each message is one JSON file. The payload is stored base64-encoded so the
//! file stays valid JSON whatever the body holds.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use order_queue_core::message::{
    DeadLetterReason, DeadLetteredMessage, LockToken, OutboundMessage, ReceivedMessage,
};
use order_queue_core::queue::QueueError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A message as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message id as sent
    pub message_id: String,
    /// Subject line
    #[serde(default)]
    pub subject: String,
    /// Body content type
    #[serde(default)]
    pub content_type: String,
    /// Application properties
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Base64 payload
    pub body: String,
    /// First enqueue time
    pub enqueued_at: DateTime<Utc>,
    /// Deliveries so far
    #[serde(default)]
    pub delivery_count: u32,
    /// Lease expiry while in flight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
    /// Set once dead-lettered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter: Option<DeadLetterRecord>,
}

/// Dead-letter metadata stored alongside the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Machine-readable reason
    pub reason: String,
    /// Free-form detail
    pub description: String,
    /// When the message was parked
    pub dead_lettered_at: DateTime<Utc>,
}

impl Envelope {
    /// Wrap an outbound message for its first write.
    pub fn from_outbound(message: &OutboundMessage, now: DateTime<Utc>) -> Self {
        Self {
            message_id: message.message_id.clone(),
            subject: message.subject.clone(),
            content_type: message.content_type.clone(),
            properties: message.properties.clone(),
            body: STANDARD.encode(&message.body),
            enqueued_at: now,
            delivery_count: 0,
            locked_until: None,
            dead_letter: None,
        }
    }

    /// Decode a file's bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, QueueError> {
        serde_json::from_slice(bytes)
            .map_err(|e| QueueError::Serialization(format!("corrupt queue file: {e}")))
    }

    /// Encode for writing.
    pub fn to_bytes(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec_pretty(self).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    fn body_bytes(&self) -> Result<Vec<u8>, QueueError> {
        STANDARD
            .decode(&self.body)
            .map_err(|e| QueueError::Serialization(format!("corrupt message body: {e}")))
    }

    /// The message as handed to a consumer.
    pub fn to_received(&self, lock_token: LockToken) -> Result<ReceivedMessage, QueueError> {
        Ok(ReceivedMessage {
            message_id: self.message_id.clone(),
            body: self.body_bytes()?,
            properties: self.properties.clone(),
            delivery_count: self.delivery_count,
            enqueued_at: self.enqueued_at,
            locked_until: self.locked_until,
            lock_token,
        })
    }

    /// Mark as dead-lettered.
    pub fn park(&mut self, reason: &DeadLetterReason, now: DateTime<Utc>) {
        self.locked_until = None;
        self.dead_letter = Some(DeadLetterRecord {
            reason: reason.reason.clone(),
            description: reason.description.clone(),
            dead_lettered_at: now,
        });
    }

    /// The parked message, `None` if this envelope was never dead-lettered.
    pub fn to_dead_lettered(&self) -> Result<Option<DeadLetteredMessage>, QueueError> {
        let Some(record) = &self.dead_letter else {
            return Ok(None);
        };
        Ok(Some(DeadLetteredMessage {
            message_id: self.message_id.clone(),
            body: self.body_bytes()?,
            delivery_count: self.delivery_count,
            reason: DeadLetterReason::new(record.reason.clone(), record.description.clone()),
            dead_lettered_at: record.dead_lettered_at,
        }))
    }
}
