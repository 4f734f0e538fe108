//! Builders for the values test scenarios keep needing.
//!
//! These helpers panic on invalid input; they exist for tests only.

use tillcore::{CartLine, Money, Product, ProductId, ProductName, Quantity, UserId};

/// Parse a money literal such as `"5.00"`.
pub fn money(amount: &str) -> Money {
    amount.parse().expect("fixture money literal should be valid")
}

/// A positive quantity.
pub fn quantity(units: u32) -> Quantity {
    Quantity::try_new(units).expect("fixture quantity should be positive")
}

/// A user id.
pub fn user(raw: i64) -> UserId {
    UserId::try_new(raw).expect("fixture user id should be positive")
}

/// A user id no other scenario is likely to use, so scenarios can share a
/// database.
pub fn unique_user() -> UserId {
    user(i64::from(rand::random::<u32>()) + 1)
}

/// An available product with a fresh id.
pub fn product(name: &str, price: &str, stock: u32) -> Product {
    Product::new(
        ProductId::generate(),
        ProductName::try_new(name).expect("fixture product name should be valid"),
        money(price),
        stock,
    )
}

/// A cart line sold at the catalog price.
pub fn line(product: &Product, units: u32) -> CartLine {
    CartLine::new(product.id, quantity(units))
}
