//! Wire format for orders in flight.
//!
//! Orders travel as UTF-8 JSON with stable PascalCase field names:
//!
//! ```text
//! {
//!   "OrderId": "3f0c…",
//!   "OrderDate": "2025-01-01T10:15:00Z",
//!   "Items": [
//!     { "ProductId": 1, "ProductName": "…", "SKU": "…",
//!       "Price": 149.99, "Quantity": 1, "Subtotal": 149.99 }
//!   ],
//!   "Subtotal": 149.99, "Tax": 12.0, "Shipping": 0.0, "Total": 161.99,
//!   "CustomerSessionId": "…"
//! }
//! ```
//!
//! The format is versionless. Producers and consumers may be skewed, so decoding
//! ignores unknown fields and defaults missing ones (except `OrderId`, without
//! which a message cannot be acknowledged meaningfully). Money accepts JSON
//! numbers or numeric strings.

use crate::order::OrderRecord;
use thiserror::Error;

/// MIME type stamped on every order message.
pub const CONTENT_TYPE: &str = "application/json";

/// Errors from encoding or decoding an order payload.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Failed to serialize an order.
    #[error("Failed to encode order: {0}")]
    Encode(String),

    /// Failed to deserialize a payload into an order.
    ///
    /// Payloads that fail here are poison messages: retrying cannot fix them.
    #[error("Failed to decode order: {0}")]
    Decode(String),
}

/// Serialize an order into its wire representation.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode_order(order: &OrderRecord) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(order).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Deserialize an order from its wire representation.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the bytes are not valid UTF-8 JSON or do not
/// describe an order.
pub fn decode_order(bytes: &[u8]) -> Result<OrderRecord, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Serde adapter for `OrderDate`.
///
/// Writes RFC 3339 in UTC. Reads RFC 3339 with any offset, and falls back to
/// offset-less timestamps (interpreted as UTC) since older producers emit local
/// times without a zone designator.
pub mod order_date {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as RFC 3339.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    /// Deserialize from RFC 3339, or from a naive timestamp taken as UTC.
    ///
    /// # Errors
    ///
    /// Returns a custom error when the string matches neither form.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid OrderDate: {raw}")))
    }

    pub(crate) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::order::{OrderId, OrderItem, OrderTotals};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    fn sample() -> OrderRecord {
        let items = vec![
            OrderItem::new(1, "Wireless Bluetooth Headphones", "ELEC-WBH-001", dec("149.99"), 1),
            OrderItem::new(4, "Men's Cotton T-Shirt", "CLO-TSHIRT-004", dec("19.99"), 2),
        ];
        let totals =
            OrderTotals::new(dec("189.97"), dec("15.20"), Decimal::ZERO, dec("205.17")).unwrap();
        OrderRecord::new(
            OrderId::new("order-1"),
            Utc.with_ymd_and_hms(2025, 1, 1, 10, 15, 0).unwrap(),
            "session-abc",
            items,
            totals,
        )
        .unwrap()
    }

    #[test]
    fn encoded_payload_uses_wire_field_names() {
        let bytes = encode_order(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        for field in [
            "OrderId",
            "OrderDate",
            "Items",
            "Subtotal",
            "Tax",
            "Shipping",
            "Total",
            "CustomerSessionId",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        let item = &value["Items"][0];
        for field in ["ProductId", "ProductName", "SKU", "Price", "Quantity", "Subtotal"] {
            assert!(item.get(field).is_some(), "missing item field {field}");
        }
        assert_eq!(value["OrderId"], "order-1");
        assert_eq!(value["Items"][1]["SKU"], "CLO-TSHIRT-004");
    }

    #[test]
    fn decode_restores_encoded_order() {
        let order = sample();
        let decoded = decode_order(&encode_order(&order).unwrap()).unwrap();
        assert_eq!(decoded, order);
    }

    #[test]
    fn decode_ignores_unknown_and_defaults_missing_fields() {
        let payload = br#"{
            "OrderId": "legacy-7",
            "OrderDate": "2024-06-30T08:00:00.1234567",
            "Items": [{ "ProductId": 3, "Price": "49.99", "Quantity": 1, "Subtotal": 49.99, "Color": "red" }],
            "Total": 59.97,
            "LoyaltyTier": "gold"
        }"#;

        let order = decode_order(payload).unwrap();
        assert_eq!(order.order_id().as_str(), "legacy-7");
        assert_eq!(order.items()[0].price, dec("49.99"));
        assert_eq!(order.items()[0].sku, "");
        assert_eq!(order.subtotal(), Decimal::ZERO);
        assert_eq!(order.total(), dec("59.97"));
        assert_eq!(order.customer_session_id(), "");
        assert_eq!(
            order.order_date(),
            Utc.with_ymd_and_hms(2024, 6, 30, 8, 0, 0).unwrap()
                + chrono::Duration::nanoseconds(123_456_700)
        );
    }

    #[test]
    fn decode_accepts_offset_dates() {
        let payload = br#"{"OrderId":"x","OrderDate":"2025-03-01T12:00:00-05:00"}"#;
        let order = decode_order(payload).unwrap();
        assert_eq!(
            order.order_date(),
            Utc.with_ymd_and_hms(2025, 3, 1, 17, 0, 0).unwrap()
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_order(b"\xff\xfe not json"),
            Err(CodecError::Decode(_))
        ));
        assert!(matches!(
            decode_order(br#"{"Items": []}"#),
            Err(CodecError::Decode(_))
        ));
        assert!(matches!(
            decode_order(br#"{"OrderId":"x","OrderDate":"yesterday"}"#),
            Err(CodecError::Decode(_))
        ));
    }
}
