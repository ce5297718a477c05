use order_queue_core::checkout::{CartSnapshot, InMemoryCatalog, Product, ProductLookup};
use order_queue_core::environment::Clock;
use order_queue_core::order::{OrderError, OrderRecord};
use rust_decimal::Decimal;

fn product(
    id: i32,
    name: &str,
    description: &str,
    cents: i64,
    category: &str,
    sku: &str,
    stock_quantity: u32,
) -> Product {
    Product {
        id,
        name: name.to_string(),
        description: description.to_string(),
        price: Decimal::new(cents, 2),
        category: category.to_string(),
        sku: sku.to_string(),
        stock_quantity,
        is_active: true,
    }
}

/// The storefront's seeded catalog.
#[must_use]
pub fn demo_catalog() -> InMemoryCatalog {
    InMemoryCatalog::new([
        product(
            1,
            "Wireless Bluetooth Headphones",
            "Premium noise-cancelling wireless headphones with 30-hour battery life",
            14_999,
            "Electronics",
            "ELEC-WBH-001",
            45,
        ),
        product(
            2,
            "4K Smart TV 55 inch",
            "Ultra HD Smart TV with HDR support and built-in streaming apps",
            59_999,
            "Electronics",
            "ELEC-TV-002",
            12,
        ),
        product(
            3,
            "Laptop Backpack",
            "Water-resistant backpack with padded laptop compartment up to 17 inches",
            4_999,
            "Electronics",
            "ELEC-BAG-003",
            78,
        ),
        product(
            4,
            "Men's Cotton T-Shirt",
            "Comfortable 100% cotton t-shirt available in multiple colors",
            1_999,
            "Clothing",
            "CLO-TSHIRT-004",
            150,
        ),
        product(
            5,
            "Women's Running Shoes",
            "Lightweight running shoes with superior cushioning and breathability",
            8_999,
            "Clothing",
            "CLO-SHOE-005",
            63,
        ),
        product(
            6,
            "Denim Jeans",
            "Classic fit denim jeans with stretch fabric for comfort",
            5_999,
            "Clothing",
            "CLO-JEAN-006",
            92,
        ),
    ])
}

/// Build the `n`th demo cart.
///
/// Every third cart is a single low-priced item so the flat shipping fee shows
/// up; the others mix two products.
///
/// # Errors
///
/// Returns an [`OrderError`] if the catalog cannot satisfy the cart.
pub fn demo_cart(catalog: &dyn ProductLookup, n: usize) -> Result<CartSnapshot, OrderError> {
    let products = catalog.list_products();
    if products.is_empty() {
        return Err(OrderError::Empty);
    }
    let pick = |offset: usize| products[(n + offset) % products.len()].id;

    let mut cart = CartSnapshot::new(format!("demo-session-{n}"));
    if n % 3 == 2 {
        let cheapest = products
            .iter()
            .min_by_key(|p| p.price)
            .map_or_else(|| pick(0), |p| p.id);
        cart.add_from_catalog(catalog, cheapest, 1)?;
    } else {
        cart.add_from_catalog(catalog, pick(0), 1)?;
        let quantity = u32::try_from(n % 2).unwrap_or(0) + 1;
        cart.add_from_catalog(catalog, pick(3), quantity)?;
    }
    Ok(cart)
}

/// Price `count` demo carts into orders.
///
/// # Errors
///
/// Returns the first [`OrderError`] raised while building a cart or pricing it.
pub fn demo_orders(
    catalog: &dyn ProductLookup,
    count: usize,
    clock: &dyn Clock,
) -> Result<Vec<OrderRecord>, OrderError> {
    (0..count)
        .map(|n| OrderRecord::from_cart(&demo_cart(catalog, n)?, clock))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use order_queue_core::checkout::FLAT_SHIPPING;
    use order_queue_testing::test_clock;

    #[test]
    fn test_catalog_is_seeded() {
        let catalog = demo_catalog();
        assert_eq!(catalog.len(), 6);
        let tv = catalog.get_product(2).unwrap();
        assert_eq!(tv.sku, "ELEC-TV-002");
        assert_eq!(tv.price, Decimal::new(59_999, 2));
        assert!(catalog.list_products().iter().all(|p| p.is_active));
    }

    #[test]
    fn test_demo_orders_balance() {
        let catalog = demo_catalog();
        let orders = demo_orders(&catalog, 9, &test_clock()).unwrap();
        assert_eq!(orders.len(), 9);
        for order in &orders {
            let totals = order.totals();
            assert_eq!(
                totals.subtotal() + totals.tax() + totals.shipping(),
                totals.total()
            );
        }
    }

    #[test]
    fn test_single_item_cart_pays_shipping() {
        let catalog = demo_catalog();
        let order = OrderRecord::from_cart(&demo_cart(&catalog, 2).unwrap(), &test_clock()).unwrap();
        assert_eq!(order.items().len(), 1);
        assert_eq!(order.items()[0].sku, "CLO-TSHIRT-004");
        assert_eq!(order.totals().shipping(), FLAT_SHIPPING);
    }

    #[test]
    fn test_order_ids_are_distinct() {
        let catalog = demo_catalog();
        let orders = demo_orders(&catalog, 5, &test_clock()).unwrap();
        let mut ids: Vec<_> = orders.iter().map(|o| o.order_id().clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn test_empty_catalog_is_rejected() {
        let catalog = InMemoryCatalog::new([]);
        assert_eq!(demo_cart(&catalog, 0).unwrap_err(), OrderError::Empty);
    }
}
