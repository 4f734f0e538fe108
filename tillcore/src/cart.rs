//! Cart input: the lines rung up at the till and the tender handed over.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tillcore_types::{Money, PaymentMethod, ProductId, Quantity, ValidationError};

/// One requested line of a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Product to sell
    pub product_id: ProductId,
    /// Units to sell
    pub quantity: Quantity,
    /// Price override; the catalog price is used when absent
    pub unit_price: Option<Money>,
}

impl CartLine {
    /// A line sold at the catalog price.
    pub const fn new(product_id: ProductId, quantity: Quantity) -> Self {
        Self {
            product_id,
            quantity,
            unit_price: None,
        }
    }

    /// Sell this line at `unit_price` instead of the catalog price.
    #[must_use]
    pub const fn with_unit_price(mut self, unit_price: Money) -> Self {
        self.unit_price = Some(unit_price);
        self
    }

    /// Build a line from unvalidated request values.
    pub fn parse(
        product_id: ProductId,
        quantity: u32,
        unit_price: Option<Decimal>,
    ) -> Result<Self, ValidationError> {
        let quantity = Quantity::try_new(quantity)?;
        let unit_price = unit_price.map(Money::new).transpose()?;
        Ok(Self {
            product_id,
            quantity,
            unit_price,
        })
    }
}

/// A cart that passed input validation: non-empty, every product at most
/// once.
#[derive(Debug, Clone)]
pub(crate) struct Cart {
    lines: Vec<CartLine>,
    product_ids: BTreeSet<ProductId>,
}

impl Cart {
    pub(crate) fn validate(lines: Vec<CartLine>) -> Result<Self, ValidationError> {
        if lines.is_empty() {
            return Err(ValidationError::EmptyCart);
        }
        let mut product_ids = BTreeSet::new();
        for line in &lines {
            if !product_ids.insert(line.product_id) {
                return Err(ValidationError::DuplicateProduct(line.product_id));
            }
        }
        Ok(Self { lines, product_ids })
    }

    pub(crate) fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Distinct product ids in ascending order, the order rows get locked in.
    pub(crate) const fn product_ids(&self) -> &BTreeSet<ProductId> {
        &self.product_ids
    }
}

/// Payment handed over at a till checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tender {
    /// Amount received from the customer
    pub amount: Money,
    /// How it was paid
    pub method: PaymentMethod,
}

impl Tender {
    /// Tender of `amount` paid with `method`.
    pub const fn new(amount: Money, method: PaymentMethod) -> Self {
        Self { amount, method }
    }

    /// Cash tender, the till's default method.
    pub fn cash(amount: Money) -> Self {
        Self::new(amount, PaymentMethod::cash())
    }

    /// Change due when this tender covers `total`.
    pub fn change_for(&self, total: Money) -> Option<Money> {
        self.amount.checked_sub(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(product_id: ProductId, quantity: u32) -> CartLine {
        CartLine::new(product_id, Quantity::try_new(quantity).unwrap())
    }

    #[test]
    fn empty_cart_is_rejected() {
        assert!(matches!(
            Cart::validate(Vec::new()),
            Err(ValidationError::EmptyCart)
        ));
    }

    #[test]
    fn repeated_product_is_rejected() {
        let product_id = ProductId::generate();

        let result = Cart::validate(vec![line(product_id, 1), line(product_id, 2)]);

        assert!(matches!(
            result,
            Err(ValidationError::DuplicateProduct(id)) if id == product_id
        ));
    }

    #[test]
    fn product_ids_are_sorted_regardless_of_cart_order() {
        let first = ProductId::generate();
        let second = ProductId::generate();

        let cart = Cart::validate(vec![line(second, 1), line(first, 1)]).unwrap();

        let ids: Vec<_> = cart.product_ids().iter().copied().collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(cart.lines()[0].product_id, second);
    }

    #[test]
    fn parse_rejects_zero_quantity_and_bad_prices() {
        let product_id = ProductId::generate();

        assert!(matches!(
            CartLine::parse(product_id, 0, None),
            Err(ValidationError::Quantity(_))
        ));
        assert!(matches!(
            CartLine::parse(product_id, 1, Some(dec!(-1.00))),
            Err(ValidationError::Money(_))
        ));
        assert!(matches!(
            CartLine::parse(product_id, 1, Some(dec!(0.001))),
            Err(ValidationError::Money(_))
        ));

        let parsed = CartLine::parse(product_id, 2, Some(dec!(4.50))).unwrap();
        assert_eq!(parsed.unit_price, Some(Money::new(dec!(4.50)).unwrap()));
    }

    #[test]
    fn change_is_only_due_when_tender_covers_total() {
        let tender = Tender::cash(Money::new(dec!(20.00)).unwrap());

        assert_eq!(
            tender.change_for(Money::new(dec!(15.00)).unwrap()),
            Some(Money::new(dec!(5.00)).unwrap())
        );
        assert_eq!(tender.change_for(Money::new(dec!(25.00)).unwrap()), None);
    }
}
