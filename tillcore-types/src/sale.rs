//! Ledger entities: products as seen by the engine, sales, their line items,
//! and the append-only sale event log.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    CancellationReason, Money, MoneyError, PaymentMethod, PaymentReference, ProductId,
    ProductName, Quantity, SaleEventId, SaleId, UserId,
};

/// A catalog product as exposed by the inventory store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Unique product identifier
    pub id: ProductId,
    /// Display name
    pub name: ProductName,
    /// Current unit price
    pub price: Money,
    /// Units on hand
    pub stock: u32,
    /// Whether the product is offered at the till
    pub is_available: bool,
}

impl Product {
    /// Create an available product.
    pub fn new(id: ProductId, name: ProductName, price: Money, stock: u32) -> Self {
        Self {
            id,
            name,
            price,
            stock,
            is_available: true,
        }
    }

    /// Mark the product as withdrawn from sale.
    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.is_available = false;
        self
    }
}

/// New stock level for one product, applied in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockUpdate {
    /// Product whose stock changes
    pub product_id: ProductId,
    /// Absolute stock value after the update
    pub stock: u32,
}

/// Lifecycle status of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleStatus {
    /// Recorded, stock reserved, awaiting payment
    Pending,
    /// Paid; terminal
    Completed,
    /// Cancelled with stock restored; terminal
    Cancelled,
}

impl SaleStatus {
    /// Storage representation of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether no further status change is allowed.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl Display for SaleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sale status '{0}'")]
pub struct UnknownSaleStatus(pub String);

impl FromStr for SaleStatus {
    type Err = UnknownSaleStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(UnknownSaleStatus(other.to_string())),
        }
    }
}

/// A recorded sale.
///
/// `total_amount` is derived from the sale's items and is never supplied by
/// a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    /// Ledger-assigned identifier
    pub id: SaleId,
    /// Operator who recorded the sale
    pub vendor: UserId,
    /// Current lifecycle status
    pub status: SaleStatus,
    /// Sum of all line totals
    pub total_amount: Money,
    /// Payment confirmation, set when the sale completes
    pub payment_reference: Option<PaymentReference>,
    /// Free-form operator notes
    pub notes: Option<String>,
    /// When the sale was recorded
    pub created_at: DateTime<Utc>,
    /// When the sale last changed
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    /// A freshly opened sale: pending with a zero total.
    pub fn open(id: SaleId, vendor: UserId, notes: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            id,
            vendor,
            status: SaleStatus::Pending,
            total_amount: Money::zero(),
            payment_reference: None,
            notes,
            created_at: at,
            updated_at: at,
        }
    }
}

/// One product line of a sale.
///
/// The line total is computed on construction from the snapshotted unit
/// price, so `line_total == unit_price * quantity` holds for every value of
/// this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleItem {
    sale_id: SaleId,
    product_id: ProductId,
    quantity: Quantity,
    unit_price: Money,
    line_total: Money,
}

impl SaleItem {
    /// Price a line item.
    pub fn new(
        sale_id: SaleId,
        product_id: ProductId,
        quantity: Quantity,
        unit_price: Money,
    ) -> Result<Self, MoneyError> {
        let line_total = unit_price.multiply_by_quantity(quantity)?;
        Ok(Self {
            sale_id,
            product_id,
            quantity,
            unit_price,
            line_total,
        })
    }

    /// Sale this line belongs to.
    pub const fn sale_id(&self) -> SaleId {
        self.sale_id
    }

    /// Product sold on this line.
    pub const fn product_id(&self) -> ProductId {
        self.product_id
    }

    /// Units sold.
    pub const fn quantity(&self) -> Quantity {
        self.quantity
    }

    /// Unit price captured when the sale was created.
    pub const fn unit_price(&self) -> Money {
        self.unit_price
    }

    /// `unit_price * quantity`.
    pub const fn line_total(&self) -> Money {
        self.line_total
    }
}

/// A sale together with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDetails {
    /// The sale row
    pub sale: Sale,
    /// Its items in the order they were rung up
    pub items: Vec<SaleItem>,
}

impl SaleDetails {
    /// Sum of the item line totals.
    pub fn items_total(&self) -> Result<Money, MoneyError> {
        self.items
            .iter()
            .try_fold(Money::zero(), |total, item| total.checked_add(item.line_total()))
    }
}

/// Kind of a recorded sale event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleEventType {
    /// Sale recorded
    Created,
    /// Payment confirmed
    MarkedPaid,
    /// Sale cancelled
    Cancelled,
}

impl SaleEventType {
    /// Storage representation of the event type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::MarkedPaid => "MARKED_PAID",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl Display for SaleEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition-specific details of a sale event.
///
/// Serialized with an `event_type` tag so the audit log stays readable as
/// plain JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleEventPayload {
    /// The sale was recorded with this total.
    Created {
        /// Total of the sale at creation
        total: Money,
    },
    /// The sale was paid.
    MarkedPaid {
        /// Confirmation reference stored on the sale
        payment_reference: PaymentReference,
        /// Tender method, for till checkouts
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payment_method: Option<PaymentMethod>,
        /// Amount handed over, for till checkouts
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount_paid: Option<Money>,
        /// Change returned, for till checkouts
        #[serde(default, skip_serializing_if = "Option::is_none")]
        change: Option<Money>,
    },
    /// The sale was cancelled and its stock restored.
    Cancelled {
        /// Operator-supplied reason
        reason: Option<CancellationReason>,
    },
}

impl SaleEventPayload {
    /// Payment confirmed through a payment callback.
    pub fn marked_paid(payment_reference: PaymentReference) -> Self {
        Self::MarkedPaid {
            payment_reference,
            payment_method: None,
            amount_paid: None,
            change: None,
        }
    }

    /// The event type this payload belongs to.
    pub const fn event_type(&self) -> SaleEventType {
        match self {
            Self::Created { .. } => SaleEventType::Created,
            Self::MarkedPaid { .. } => SaleEventType::MarkedPaid,
            Self::Cancelled { .. } => SaleEventType::Cancelled,
        }
    }
}

/// An event waiting to be appended by a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSaleEvent {
    /// Sale the event documents
    pub sale_id: SaleId,
    /// Operator who caused the transition, if known
    pub actor: Option<UserId>,
    /// Transition details
    pub payload: SaleEventPayload,
}

/// An immutable, committed audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleEvent {
    /// Ledger-assigned identifier
    pub id: SaleEventId,
    /// Sale the event documents
    pub sale_id: SaleId,
    /// Operator who caused the transition, if known
    pub actor: Option<UserId>,
    /// Transition details
    pub payload: SaleEventPayload,
    /// When the event was appended
    pub recorded_at: DateTime<Utc>,
}

impl SaleEvent {
    /// Shorthand for `self.payload.event_type()`.
    pub const fn event_type(&self) -> SaleEventType {
        self.payload.event_type()
    }
}
