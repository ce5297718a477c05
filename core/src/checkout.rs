//! Checkout: product lookup, cart snapshots and the pricing policy.
//!
//! The queue layer never computes money. Totals are fixed here, once, when a cart
//! is turned into an [`OrderRecord`]:
//!
//! - subtotal = Σ price × quantity
//! - tax = 8 % of subtotal, rounded half away from zero to cents
//! - shipping = 5.99 when subtotal ≤ 50.00, otherwise free
//! - total = subtotal + tax + shipping

use crate::environment::Clock;
use crate::order::{OrderError, OrderId, OrderItem, OrderRecord, OrderTotals};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;

/// Sales tax rate (8 %).
pub const TAX_RATE: Decimal = Decimal::from_parts(8, 0, 0, false, 2);

/// Orders with a subtotal above this ship free.
pub const FREE_SHIPPING_THRESHOLD: Decimal = Decimal::from_parts(5000, 0, 0, false, 2);

/// Flat shipping fee below the threshold.
pub const FLAT_SHIPPING: Decimal = Decimal::from_parts(599, 0, 0, false, 2);

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    /// Catalog id
    pub id: i32,
    /// Display name
    pub name: String,
    /// Long description
    pub description: String,
    /// Unit price
    pub price: Decimal,
    /// Category name
    pub category: String,
    /// Stock keeping unit
    pub sku: String,
    /// Units on hand
    pub stock_quantity: u32,
    /// Whether the product can be sold
    pub is_active: bool,
}

/// Read-only product lookup.
pub trait ProductLookup: Send + Sync {
    /// Fetch one product by id.
    fn get_product(&self, id: i32) -> Option<Product>;

    /// All products, in catalog order.
    fn list_products(&self) -> Vec<Product>;
}

/// Owned in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    products: BTreeMap<i32, Product>,
}

impl InMemoryCatalog {
    /// Build a catalog from a product list. Later duplicates replace earlier ones.
    #[must_use]
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            products: products.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    /// Number of products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.products.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

impl ProductLookup for InMemoryCatalog {
    fn get_product(&self, id: i32) -> Option<Product> {
        self.products.get(&id).cloned()
    }

    fn list_products(&self) -> Vec<Product> {
        self.products.values().cloned().collect()
    }
}

/// One cart line: a product snapshot and a quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    /// Product as it was when added
    pub product: Product,
    /// Units in the cart
    pub quantity: u32,
}

impl CartLine {
    /// `price × quantity`.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.product.price * Decimal::from(self.quantity)
    }
}

/// An ordered cart belonging to one customer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSnapshot {
    session_id: String,
    lines: Vec<CartLine>,
}

impl CartSnapshot {
    /// Start an empty cart.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            lines: Vec::new(),
        }
    }

    /// Add a product. Adding a product already in the cart increases its quantity.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::InvalidQuantity`] for a zero quantity.
    pub fn add(&mut self, product: Product, quantity: u32) -> Result<(), OrderError> {
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                product_id: product.id,
                quantity,
            });
        }
        if let Some(line) = self.lines.iter_mut().find(|l| l.product.id == product.id) {
            line.quantity = line.quantity.saturating_add(quantity);
        } else {
            self.lines.push(CartLine { product, quantity });
        }
        Ok(())
    }

    /// Look a product up and add it, checking it is sellable and in stock.
    ///
    /// The stock check covers the merged quantity, not just this call.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::ProductNotFound`], [`OrderError::ProductInactive`],
    /// [`OrderError::InsufficientStock`] or [`OrderError::InvalidQuantity`].
    pub fn add_from_catalog(
        &mut self,
        catalog: &dyn ProductLookup,
        product_id: i32,
        quantity: u32,
    ) -> Result<(), OrderError> {
        let product = catalog
            .get_product(product_id)
            .ok_or(OrderError::ProductNotFound(product_id))?;
        if !product.is_active {
            return Err(OrderError::ProductInactive(product_id));
        }
        let already = self
            .lines
            .iter()
            .find(|l| l.product.id == product_id)
            .map_or(0, |l| l.quantity);
        let requested = already.saturating_add(quantity);
        if requested > product.stock_quantity {
            return Err(OrderError::InsufficientStock {
                product_id,
                requested,
                available: product.stock_quantity,
            });
        }
        self.add(product, quantity)
    }

    /// The owning session.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Lines in insertion order.
    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Apply the pricing policy to a subtotal.
///
/// # Errors
///
/// Returns [`OrderError::NegativeAmount`] for a negative subtotal.
pub fn price_subtotal(subtotal: Decimal) -> Result<OrderTotals, OrderError> {
    let tax = (subtotal * TAX_RATE).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let shipping = if subtotal > FREE_SHIPPING_THRESHOLD {
        Decimal::ZERO
    } else {
        FLAT_SHIPPING
    };
    OrderTotals::new(subtotal, tax, shipping, subtotal + tax + shipping)
}

/// Price a cart.
///
/// # Errors
///
/// Returns [`OrderError::Empty`] for an empty cart.
pub fn price_cart(cart: &CartSnapshot) -> Result<OrderTotals, OrderError> {
    if cart.is_empty() {
        return Err(OrderError::Empty);
    }
    price_subtotal(cart.lines().iter().map(CartLine::subtotal).sum())
}

impl OrderRecord {
    /// Turn a cart into a priced, validated order with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::Empty`] for an empty cart, or a validation error from
    /// [`OrderRecord::new`].
    pub fn from_cart(cart: &CartSnapshot, clock: &dyn Clock) -> Result<Self, OrderError> {
        let totals = price_cart(cart)?;
        let items = cart
            .lines()
            .iter()
            .map(|line| {
                OrderItem::new(
                    line.product.id,
                    line.product.name.clone(),
                    line.product.sku.clone(),
                    line.product.price,
                    line.quantity,
                )
            })
            .collect();
        Self::new(
            OrderId::generate(),
            clock.now(),
            cart.session_id(),
            items,
            totals,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::environment::SystemClock;
    use proptest::prelude::*;

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    fn product(id: i32, price: &str, stock: u32) -> Product {
        Product {
            id,
            name: format!("Product {id}"),
            description: String::new(),
            price: dec(price),
            category: "Test".to_string(),
            sku: format!("SKU-{id:03}"),
            stock_quantity: stock,
            is_active: true,
        }
    }

    #[test]
    fn hundred_dollar_order_ships_free() {
        let totals = price_subtotal(dec("100.00")).unwrap();
        assert_eq!(totals.tax(), dec("8.00"));
        assert_eq!(totals.shipping(), Decimal::ZERO);
        assert_eq!(totals.total(), dec("108.00"));
    }

    #[test]
    fn shipping_boundary_is_inclusive_at_fifty() {
        let at = price_subtotal(dec("50.00")).unwrap();
        assert_eq!(at.shipping(), dec("5.99"));
        assert_eq!(at.total(), dec("59.99"));

        let above = price_subtotal(dec("50.01")).unwrap();
        assert_eq!(above.shipping(), Decimal::ZERO);
        assert_eq!(above.tax(), dec("4.00"));
        assert_eq!(above.total(), dec("54.01"));
    }

    #[test]
    fn tax_rounds_to_cents() {
        // 19.99 × 8 % = 1.5992
        let totals = price_subtotal(dec("19.99")).unwrap();
        assert_eq!(totals.tax(), dec("1.60"));
        assert_eq!(totals.total(), dec("27.58"));
    }

    #[test]
    fn empty_cart_is_rejected() {
        let cart = CartSnapshot::new("s1");
        assert_eq!(price_cart(&cart).unwrap_err(), OrderError::Empty);
        assert_eq!(
            OrderRecord::from_cart(&cart, &SystemClock).unwrap_err(),
            OrderError::Empty
        );
    }

    #[test]
    fn adding_same_product_merges_lines() {
        let mut cart = CartSnapshot::new("s1");
        cart.add(product(1, "10.00", 5), 1).unwrap();
        cart.add(product(2, "3.00", 5), 1).unwrap();
        cart.add(product(1, "10.00", 5), 2).unwrap();

        assert_eq!(cart.lines().len(), 2);
        assert_eq!(cart.lines()[0].quantity, 3);
        assert_eq!(cart.lines()[1].product.id, 2);
    }

    #[test]
    fn catalog_checks_stock_and_status() {
        let mut inactive = product(3, "1.00", 10);
        inactive.is_active = false;
        let catalog = InMemoryCatalog::new([product(1, "10.00", 2), inactive]);
        let mut cart = CartSnapshot::new("s1");

        cart.add_from_catalog(&catalog, 1, 2).unwrap();
        assert_eq!(
            cart.add_from_catalog(&catalog, 1, 1).unwrap_err(),
            OrderError::InsufficientStock {
                product_id: 1,
                requested: 3,
                available: 2
            }
        );
        assert_eq!(
            cart.add_from_catalog(&catalog, 3, 1).unwrap_err(),
            OrderError::ProductInactive(3)
        );
        assert_eq!(
            cart.add_from_catalog(&catalog, 99, 1).unwrap_err(),
            OrderError::ProductNotFound(99)
        );
    }

    #[test]
    fn order_from_cart_preserves_line_order() {
        let mut cart = CartSnapshot::new("session-42");
        cart.add(product(5, "89.99", 10), 1).unwrap();
        cart.add(product(4, "19.99", 10), 2).unwrap();

        let order = OrderRecord::from_cart(&cart, &SystemClock).unwrap();
        let ids: Vec<i32> = order.items().iter().map(|i| i.product_id).collect();
        assert_eq!(ids, vec![5, 4]);
        assert_eq!(order.subtotal(), dec("129.97"));
        assert_eq!(order.customer_session_id(), "session-42");
    }

    proptest! {
        #[test]
        fn priced_carts_satisfy_total_invariant(
            lines in prop::collection::vec((1_i64..100_000, 1_u32..20), 1..6)
        ) {
            let mut cart = CartSnapshot::new("prop");
            for (idx, (cents, qty)) in lines.iter().enumerate() {
                let id = i32::try_from(idx).unwrap();
                let mut p = product(id, "0", 1_000);
                p.price = Decimal::new(*cents, 2);
                cart.add(p, *qty).unwrap();
            }

            let order = OrderRecord::from_cart(&cart, &SystemClock).unwrap();
            prop_assert_eq!(order.total(), order.subtotal() + order.tax() + order.shipping());
            prop_assert!(order.tax().scale() <= 2);
            if order.subtotal() > FREE_SHIPPING_THRESHOLD {
                prop_assert_eq!(order.shipping(), Decimal::ZERO);
            } else {
                prop_assert_eq!(order.shipping(), FLAT_SHIPPING);
            }
        }
    }
}
