//! Queue message types and the delivery state machine.
//!
//! A message moves through the following states while it is held by a backend:
//!
//! ```text
//!             receive                 complete
//! Available ───────────▶ InFlight ─────────────▶ Completed
//!     ▲                    │   │
//!     │  abandon / expiry  │   │ dead_letter
//!     └────────────────────┘   └───────────────▶ DeadLettered
//! ```
//!
//! `Completed` and `DeadLettered` are terminal. Settling a message that is not
//! `InFlight` (for example completing it twice) is reported as
//! [`QueueError::LockLost`] and leaves the state untouched.

use crate::queue::QueueError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// A message ready to be handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Message id; the order id for order messages
    pub message_id: String,
    /// Human-readable subject line
    pub subject: String,
    /// MIME type of `body`
    pub content_type: String,
    /// Serialized payload
    pub body: Vec<u8>,
    /// Application properties carried alongside the body
    pub properties: BTreeMap<String, String>,
}

impl OutboundMessage {
    /// Create a message with the given id and payload.
    #[must_use]
    pub fn new(message_id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            message_id: message_id.into(),
            subject: String::new(),
            content_type: crate::codec::CONTENT_TYPE.to_string(),
            body,
            properties: BTreeMap::new(),
        }
    }

    /// Set the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Add an application property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Backend-specific handle proving the holder owns an in-flight message.
///
/// For the file backend this is the in-flight file name, for the cloud broker the
/// lock token; for the in-process queue it is a delivery sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Wrap a backend token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message obtained from [`QueueBackend::receive`](crate::queue::QueueBackend::receive).
///
/// The holder must settle it with exactly one of `complete`, `abandon` or
/// `dead_letter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Message id as sent
    pub message_id: String,
    /// Serialized payload, untouched
    pub body: Vec<u8>,
    /// Application properties as sent
    pub properties: BTreeMap<String, String>,
    /// How many times this message has been handed out, including this one
    pub delivery_count: u32,
    /// When the message was first enqueued
    pub enqueued_at: DateTime<Utc>,
    /// Lease expiry, for backends with a visibility timeout
    pub locked_until: Option<DateTime<Utc>>,
    /// Settlement handle
    pub lock_token: LockToken,
}

/// Reason attached to a dead-lettered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterReason {
    /// Short machine-readable reason
    pub reason: String,
    /// Free-form detail
    pub description: String,
}

impl DeadLetterReason {
    /// Reason used when a payload cannot be decoded.
    pub const DESERIALIZATION_ERROR: &'static str = "deserialization-error";

    /// Reason used when a message keeps failing in the handler.
    pub const MAX_DELIVERY_COUNT_EXCEEDED: &'static str = "max-delivery-count-exceeded";

    /// Build a reason.
    #[must_use]
    pub fn new(reason: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            description: description.into(),
        }
    }

    /// Poison payload.
    #[must_use]
    pub fn deserialization_error(detail: impl Into<String>) -> Self {
        Self::new(Self::DESERIALIZATION_ERROR, detail)
    }

    /// Redelivery cap reached.
    #[must_use]
    pub fn max_delivery_count_exceeded(delivery_count: u32, last_error: &str) -> Self {
        Self::new(
            Self::MAX_DELIVERY_COUNT_EXCEEDED,
            format!("delivered {delivery_count} times; last error: {last_error}"),
        )
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.description)
    }
}

/// A message parked in a dead-letter channel, as reported by backends that can list it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetteredMessage {
    /// Message id as sent
    pub message_id: String,
    /// Payload, untouched
    pub body: Vec<u8>,
    /// Deliveries before it was parked
    pub delivery_count: u32,
    /// Why it was parked
    pub reason: DeadLetterReason,
    /// When it was parked
    pub dead_lettered_at: DateTime<Utc>,
}

/// How a holder settles an in-flight message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Remove permanently
    Complete,
    /// Release for redelivery
    Abandon,
    /// Move to the side channel
    DeadLetter,
}

impl Settlement {
    /// Verb used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Abandon => "abandon",
            Self::DeadLetter => "dead-letter",
        }
    }
}

/// Delivery state of a message held by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Waiting to be received
    Available,
    /// Held by one consumer, optionally until a lease expiry
    InFlight {
        /// Lease expiry, `None` when the backend has no visibility timeout
        locked_until: Option<DateTime<Utc>>,
    },
    /// Removed after successful handling
    Completed,
    /// Moved to the side channel
    DeadLettered,
}

impl DeliveryState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::DeadLettered)
    }

    /// Hand the message to a consumer.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LockLost`] unless the message is `Available`.
    pub fn lease(self, locked_until: Option<DateTime<Utc>>) -> Result<Self, QueueError> {
        match self {
            Self::Available => Ok(Self::InFlight { locked_until }),
            other => Err(QueueError::LockLost(format!("cannot receive a message that is {other}"))),
        }
    }

    /// Apply a settlement verb.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LockLost`] unless the message is `InFlight`.
    pub fn settle(self, settlement: Settlement) -> Result<Self, QueueError> {
        match (self, settlement) {
            (Self::InFlight { .. }, Settlement::Complete) => Ok(Self::Completed),
            (Self::InFlight { .. }, Settlement::Abandon) => Ok(Self::Available),
            (Self::InFlight { .. }, Settlement::DeadLetter) => Ok(Self::DeadLettered),
            (other, settlement) => Err(QueueError::LockLost(format!(
                "cannot {} a message that is {other}",
                settlement.as_str()
            ))),
        }
    }

    /// Return an in-flight message whose lease ran out to `Available`.
    ///
    /// States without an expired lease are returned unchanged.
    #[must_use]
    pub fn expire(self, now: DateTime<Utc>) -> Self {
        match self {
            Self::InFlight {
                locked_until: Some(until),
            } if until <= now => Self::Available,
            other => other,
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::InFlight { .. } => write!(f, "in-flight"),
            Self::Completed => write!(f, "completed"),
            Self::DeadLettered => write!(f, "dead-lettered"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn happy_path_reaches_completed() {
        let state = DeliveryState::Available.lease(None).unwrap();
        assert_eq!(state, DeliveryState::InFlight { locked_until: None });
        let state = state.settle(Settlement::Complete).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn abandon_returns_to_available() {
        let state = DeliveryState::Available
            .lease(None)
            .unwrap()
            .settle(Settlement::Abandon)
            .unwrap();
        assert_eq!(state, DeliveryState::Available);
    }

    #[test]
    fn second_complete_is_reported() {
        let state = DeliveryState::Available
            .lease(None)
            .unwrap()
            .settle(Settlement::Complete)
            .unwrap();
        let err = state.settle(Settlement::Complete).unwrap_err();
        assert!(matches!(err, QueueError::LockLost(_)));
        assert_eq!(state, DeliveryState::Completed);
    }

    #[test]
    fn terminal_states_cannot_be_leased() {
        assert!(DeliveryState::DeadLettered.lease(None).is_err());
        assert!(DeliveryState::Completed.lease(None).is_err());
    }

    #[test]
    fn expiry_only_releases_expired_leases() {
        let now = Utc::now();
        let held = DeliveryState::InFlight {
            locked_until: Some(now + Duration::seconds(30)),
        };
        assert_eq!(held.expire(now), held);

        let lapsed = DeliveryState::InFlight {
            locked_until: Some(now - Duration::seconds(1)),
        };
        assert_eq!(lapsed.expire(now), DeliveryState::Available);

        let unleased = DeliveryState::InFlight { locked_until: None };
        assert_eq!(unleased.expire(now), unleased);
    }

    #[test]
    fn dead_letter_reason_display() {
        let reason = DeadLetterReason::deserialization_error("expected value at line 1");
        assert_eq!(
            reason.to_string(),
            "deserialization-error: expected value at line 1"
        );
    }
}
