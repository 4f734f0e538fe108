//! Core value types for the `TillCore` sale transaction engine.
//!
//! All types use smart constructors to ensure validity at construction time,
//! following the "parse, don't validate" principle. Once a `Quantity` or a
//! `Money` exists, the engine never has to re-check it.

use std::fmt::Display;

use nutype::nutype;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a catalog product.
///
/// Products are owned by the inventory store; sales only reference them.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Display,
    Serialize,
    Deserialize
))]
pub struct ProductId(Uuid);

impl ProductId {
    /// Creates a fresh, time-ordered product identifier.
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

/// Identifier of a sale, assigned by the ledger's sequence.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct SaleId(i64);

/// Identifier of a sale event, assigned by the ledger's sequence.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct SaleEventId(i64);

/// Identifier of an operator (vendor or staff member).
///
/// Authentication lives outside the engine; by the time a `UserId` reaches
/// the engine it is trusted.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct UserId(i64);

/// Display name of a product.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 200),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ProductName(String);

/// Quantity of a product on a sale line. Always positive.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Quantity(u32);

/// External payment reference confirming a sale was paid.
///
/// Globally unique once stored against a sale.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct PaymentReference(String);

/// Free-text reason recorded when a sale is cancelled.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct CancellationReason(String);

/// Payment method tendered at a POS checkout, e.g. `CASH` or `CARD`.
#[nutype(
    sanitize(trim, uppercase),
    validate(not_empty, len_char_max = 32),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct PaymentMethod(String);

impl PaymentMethod {
    /// The method assumed when a checkout does not name one.
    pub fn cash() -> Self {
        Self::try_new("CASH").expect("CASH is always a valid payment method")
    }
}

/// Product search text entered at the till.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 100),
    derive(Debug, Clone, PartialEq, Eq, AsRef, Deref, Display)
)]
pub struct SearchQuery(String);

/// Errors raised when constructing a [`Money`] value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    /// Amounts are never negative.
    #[error("money amount cannot be negative: {0}")]
    Negative(Decimal),
    /// Amounts carry at most two decimal places.
    #[error("money amount cannot have more than 2 decimal places: {0}")]
    TooPrecise(Decimal),
    /// Amount does not fit the ledger's twelve-digit columns.
    #[error("money amount {0} exceeds maximum {max}", max = Money::MAX_AMOUNT)]
    TooLarge(Decimal),
    /// Text that is not a decimal number.
    #[error("failed to parse money amount '{0}'")]
    Unparseable(String),
}

/// Non-negative monetary amount with at most two decimal places.
///
/// Uses `Decimal` for exact arithmetic. The upper bound mirrors a
/// `NUMERIC(12, 2)` ledger column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Largest representable amount: 9 999 999 999.99.
    pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

    /// Create money from a decimal amount.
    pub fn new(amount: Decimal) -> Result<Self, MoneyError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(MoneyError::Negative(amount));
        }
        if amount.normalize().scale() > 2 {
            return Err(MoneyError::TooPrecise(amount));
        }
        if amount > Self::MAX_AMOUNT {
            return Err(MoneyError::TooLarge(amount));
        }
        Ok(Self(amount.abs()))
    }

    /// Create money from cents (avoids floating point issues).
    pub fn from_cents(cents: u64) -> Result<Self, MoneyError> {
        Self::new(Decimal::from(cents) / Decimal::ONE_HUNDRED)
    }

    /// Zero, the opening total of every sale.
    pub const fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Get the underlying decimal value.
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Add two amounts, failing if the result leaves the valid range.
    pub fn checked_add(self, other: Self) -> Result<Self, MoneyError> {
        Self::new(self.0 + other.0)
    }

    /// Subtract `other`, returning `None` when it is larger than `self`.
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        if other.0 > self.0 {
            return None;
        }
        Some(Self(self.0 - other.0))
    }

    /// Multiply a unit price by a quantity.
    pub fn multiply_by_quantity(self, quantity: Quantity) -> Result<Self, MoneyError> {
        Self::new(self.0 * Decimal::from(quantity.into_inner()))
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = MoneyError;

    fn try_from(amount: Decimal) -> Result<Self, Self::Error> {
        Self::new(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl std::str::FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = s
            .trim()
            .parse::<Decimal>()
            .map_err(|_| MoneyError::Unparseable(s.to_string()))?;
        Self::new(decimal)
    }
}
