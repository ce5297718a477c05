//! The order record carried by every queue message.
//!
//! An [`OrderRecord`] is built once by checkout code, fully populated, and never
//! mutated afterwards. The queue layer serializes it at `send` and deserializes it
//! at `receive`; it never recomputes totals.
//!
//! Field names are part of the wire contract (see [`crate::codec`]) and are
//! pinned with explicit serde renames so they round-trip exactly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while building or validating an order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// The cart or order has no line items.
    #[error("Order has no line items")]
    Empty,

    /// A line item has a zero quantity.
    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity {
        /// The offending product
        product_id: i32,
        /// The rejected quantity
        quantity: u32,
    },

    /// A monetary field is negative.
    #[error("Negative amount in {field}: {value}")]
    NegativeAmount {
        /// Field name as it appears on the wire
        field: &'static str,
        /// The rejected value
        value: Decimal,
    },

    /// A line subtotal does not equal price × quantity.
    #[error("Line subtotal mismatch for product {product_id}: expected {expected}, found {found}")]
    LineSubtotalMismatch {
        /// The offending product
        product_id: i32,
        /// price × quantity
        expected: Decimal,
        /// The subtotal that was supplied
        found: Decimal,
    },

    /// `subtotal + tax + shipping != total`.
    #[error("Order total mismatch: {subtotal} + {tax} + {shipping} != {total}")]
    TotalMismatch {
        /// Sum of line subtotals
        subtotal: Decimal,
        /// Tax amount
        tax: Decimal,
        /// Shipping amount
        shipping: Decimal,
        /// The total that was supplied
        total: Decimal,
    },

    /// The product lookup has no product with this id.
    #[error("Product not found: {0}")]
    ProductNotFound(i32),

    /// The product exists but is not sellable.
    #[error("Product {0} is not active")]
    ProductInactive(i32),

    /// Requested quantity exceeds the available stock.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// The offending product
        product_id: i32,
        /// Quantity in the cart
        requested: u32,
        /// Stock reported by the catalog
        available: u32,
    },
}

/// Globally unique order identifier.
///
/// Generated once at order creation and used as the queue message id, which makes
/// it the deduplication key for backends that support duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Catalog product id
    #[serde(rename = "ProductId", default)]
    pub product_id: i32,

    /// Product display name at checkout time
    #[serde(rename = "ProductName", default)]
    pub product_name: String,

    /// Stock keeping unit
    #[serde(rename = "SKU", default)]
    pub sku: String,

    /// Unit price
    #[serde(rename = "Price", default, with = "rust_decimal::serde::float")]
    pub price: Decimal,

    /// Units ordered
    #[serde(rename = "Quantity", default)]
    pub quantity: u32,

    /// `price × quantity`
    #[serde(rename = "Subtotal", default, with = "rust_decimal::serde::float")]
    pub subtotal: Decimal,
}

impl OrderItem {
    /// Build a line item, computing its subtotal from price and quantity.
    #[must_use]
    pub fn new(
        product_id: i32,
        product_name: impl Into<String>,
        sku: impl Into<String>,
        price: Decimal,
        quantity: u32,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            sku: sku.into(),
            price,
            quantity,
            subtotal: price * Decimal::from(quantity),
        }
    }

    fn validate(&self) -> Result<(), OrderError> {
        if self.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                product_id: self.product_id,
                quantity: self.quantity,
            });
        }
        if self.price < Decimal::ZERO {
            return Err(OrderError::NegativeAmount {
                field: "Price",
                value: self.price,
            });
        }
        let expected = self.price * Decimal::from(self.quantity);
        if expected != self.subtotal {
            return Err(OrderError::LineSubtotalMismatch {
                product_id: self.product_id,
                expected,
                found: self.subtotal,
            });
        }
        Ok(())
    }
}

/// Monetary totals of an order.
///
/// Construction through [`OrderTotals::new`] enforces
/// `total = subtotal + tax + shipping` and non-negative amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    subtotal: Decimal,
    tax: Decimal,
    shipping: Decimal,
    total: Decimal,
}

impl OrderTotals {
    /// Validate and bundle a set of totals.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::NegativeAmount`] for a negative component and
    /// [`OrderError::TotalMismatch`] when the total is not the sum of its parts.
    pub fn new(
        subtotal: Decimal,
        tax: Decimal,
        shipping: Decimal,
        total: Decimal,
    ) -> Result<Self, OrderError> {
        for (field, value) in [
            ("Subtotal", subtotal),
            ("Tax", tax),
            ("Shipping", shipping),
            ("Total", total),
        ] {
            if value < Decimal::ZERO {
                return Err(OrderError::NegativeAmount { field, value });
            }
        }
        if subtotal + tax + shipping != total {
            return Err(OrderError::TotalMismatch {
                subtotal,
                tax,
                shipping,
                total,
            });
        }
        Ok(Self {
            subtotal,
            tax,
            shipping,
            total,
        })
    }

    /// Sum of line subtotals.
    #[must_use]
    pub const fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    /// Tax amount.
    #[must_use]
    pub const fn tax(&self) -> Decimal {
        self.tax
    }

    /// Shipping amount.
    #[must_use]
    pub const fn shipping(&self) -> Decimal {
        self.shipping
    }

    /// Grand total.
    #[must_use]
    pub const fn total(&self) -> Decimal {
        self.total
    }
}

/// A completed order, as handed to the queue.
///
/// Fields are private: the record is immutable once created. Use
/// [`OrderRecord::new`] (or `OrderRecord::from_cart` in [`crate::checkout`]) to
/// build one; the wire decoder in [`crate::codec`] is the only other producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    #[serde(rename = "OrderId")]
    order_id: OrderId,

    #[serde(rename = "OrderDate", default, with = "crate::codec::order_date")]
    order_date: DateTime<Utc>,

    #[serde(rename = "Items", default)]
    items: Vec<OrderItem>,

    #[serde(rename = "Subtotal", default, with = "rust_decimal::serde::float")]
    subtotal: Decimal,

    #[serde(rename = "Tax", default, with = "rust_decimal::serde::float")]
    tax: Decimal,

    #[serde(rename = "Shipping", default, with = "rust_decimal::serde::float")]
    shipping: Decimal,

    #[serde(rename = "Total", default, with = "rust_decimal::serde::float")]
    total: Decimal,

    #[serde(rename = "CustomerSessionId", default)]
    customer_session_id: String,
}

impl OrderRecord {
    /// Build a validated order record.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::Empty`] without items, a line-level error for an
    /// invalid item, and [`OrderError::TotalMismatch`] when the line subtotals do
    /// not add up to `totals.subtotal()`.
    pub fn new(
        order_id: OrderId,
        order_date: DateTime<Utc>,
        customer_session_id: impl Into<String>,
        items: Vec<OrderItem>,
        totals: OrderTotals,
    ) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::Empty);
        }
        for item in &items {
            item.validate()?;
        }
        let line_sum: Decimal = items.iter().map(|item| item.subtotal).sum();
        if line_sum != totals.subtotal() {
            return Err(OrderError::TotalMismatch {
                subtotal: line_sum,
                tax: totals.tax(),
                shipping: totals.shipping(),
                total: totals.total(),
            });
        }

        Ok(Self {
            order_id,
            order_date,
            items,
            subtotal: totals.subtotal(),
            tax: totals.tax(),
            shipping: totals.shipping(),
            total: totals.total(),
            customer_session_id: customer_session_id.into(),
        })
    }

    /// The order identifier.
    #[must_use]
    pub const fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    /// When the order was created.
    #[must_use]
    pub const fn order_date(&self) -> DateTime<Utc> {
        self.order_date
    }

    /// Line items in checkout order.
    #[must_use]
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Monetary totals as carried on the wire.
    ///
    /// This is a plain view; a decoded record is not re-validated.
    #[must_use]
    pub const fn totals(&self) -> OrderTotals {
        OrderTotals {
            subtotal: self.subtotal,
            tax: self.tax,
            shipping: self.shipping,
            total: self.total,
        }
    }

    /// Sum of line subtotals.
    #[must_use]
    pub const fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    /// Tax amount.
    #[must_use]
    pub const fn tax(&self) -> Decimal {
        self.tax
    }

    /// Shipping amount.
    #[must_use]
    pub const fn shipping(&self) -> Decimal {
        self.shipping
    }

    /// Grand total.
    #[must_use]
    pub const fn total(&self) -> Decimal {
        self.total
    }

    /// The originating cart session.
    #[must_use]
    pub fn customer_session_id(&self) -> &str {
        &self.customer_session_id
    }
}
