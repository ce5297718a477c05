//! Products, carts and orders for tests.
//!
//! Orders built here go through the real checkout pricing, so their totals always
//! satisfy `total = subtotal + tax + shipping`.

#![allow(clippy::unwrap_used)] // Fixtures are built from known-good values
#![allow(clippy::missing_panics_doc)]

use crate::mocks::test_clock;
use order_queue_core::checkout::{CartSnapshot, InMemoryCatalog, Product};
use order_queue_core::order::OrderRecord;
use rust_decimal::Decimal;

/// Session id used by fixture carts.
pub const TEST_SESSION: &str = "test-session";

/// An active product with plenty of stock. `price_cents` is the unit price in cents.
#[must_use]
pub fn product(id: i32, price_cents: i64) -> Product {
    Product {
        id,
        name: format!("Product {id}"),
        description: format!("Test product {id}"),
        price: Decimal::new(price_cents, 2),
        category: "Test".to_string(),
        sku: format!("TEST-{id:03}"),
        stock_quantity: 1_000,
        is_active: true,
    }
}

/// Catalog of `count` products with ids `1..=count`, priced 10.00, 20.00, ...
#[must_use]
pub fn catalog(count: i32) -> InMemoryCatalog {
    InMemoryCatalog::new((1..=count).map(|id| product(id, i64::from(id) * 1_000)))
}

/// Cart holding `quantity` units of a product priced `price_cents`.
#[must_use]
pub fn cart_with(price_cents: i64, quantity: u32) -> CartSnapshot {
    let mut cart = CartSnapshot::new(TEST_SESSION);
    cart.add(product(1, price_cents), quantity).unwrap();
    cart
}

/// Priced order for `quantity` units at `price_cents`, with a fresh id.
#[must_use]
pub fn order_for(price_cents: i64, quantity: u32) -> OrderRecord {
    OrderRecord::from_cart(&cart_with(price_cents, quantity), &test_clock()).unwrap()
}

/// The canonical 100.00 order: 8.00 tax, free shipping, 108.00 total.
#[must_use]
pub fn sample_order() -> OrderRecord {
    order_for(10_000, 1)
}

/// `count` distinct orders with varying line prices.
#[must_use]
pub fn orders(count: usize) -> Vec<OrderRecord> {
    (0..count)
        .map(|i| order_for(1_000 + i64::try_from(i).unwrap_or(0) * 100, 1))
        .collect()
}
