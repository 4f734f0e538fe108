//! Error types for `TillCore`.
//!
//! The error design separates three layers:
//!
//! - **StoreError**: failures of the persistence layer, tagged with the
//!   [`Operation`] that failed.
//! - **ValidationError**: malformed input, always rejected before storage is
//!   touched.
//! - **SaleError**: everything the engine can report to its caller. Use
//!   [`SaleError::kind`] to map onto a transport (400 / 404 / 409 / 500).
//!
//! # Error Handling Strategy
//!
//! - **Validation**: fix the input and resubmit
//! - **NotFound**: the referenced product or sale does not exist (for this
//!   operator)
//! - **Conflict**: the current state forbids the operation; the message
//!   carries the state that blocked it (available stock, sale status)
//! - **Storage**: the unit of work was rolled back; safe to retry only for
//!   mark-paid, which is idempotent

use std::fmt;

use crate::sale::SaleStatus;
use crate::types::{
    CancellationReasonError, Money, MoneyError, PaymentMethodError, PaymentReference,
    PaymentReferenceError, ProductId, Quantity, QuantityError, SaleId, SearchQueryError,
};

/// Store operation that was being performed when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    /// Opening a unit of work.
    BeginTransaction,
    /// Locking product rows for update.
    LockProducts,
    /// Writing new stock levels.
    UpdateStock,
    /// Inserting a sale row.
    CreateSale,
    /// Inserting sale items.
    CreateItems,
    /// Writing a sale's total.
    UpdateSaleTotal,
    /// Locking a sale row for update.
    LockSale,
    /// Changing a sale's status.
    UpdateSaleStatus,
    /// Appending to the event log.
    AppendEvent,
    /// Committing a unit of work.
    CommitTransaction,
    /// Rolling back a unit of work.
    RollbackTransaction,
    /// Reading sales.
    ReadSales,
    /// Reading sale items.
    ReadItems,
    /// Reading sale events.
    ReadEvents,
    /// Reading products.
    ReadProducts,
    /// Writing a product into the catalog.
    PutProduct,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BeginTransaction => "begin_transaction",
            Self::LockProducts => "lock_products",
            Self::UpdateStock => "update_stock",
            Self::CreateSale => "create_sale",
            Self::CreateItems => "create_items",
            Self::UpdateSaleTotal => "update_sale_total",
            Self::LockSale => "lock_sale",
            Self::UpdateSaleStatus => "update_sale_status",
            Self::AppendEvent => "append_event",
            Self::CommitTransaction => "commit_transaction",
            Self::RollbackTransaction => "rollback_transaction",
            Self::ReadSales => "read_sales",
            Self::ReadItems => "read_items",
            Self::ReadEvents => "read_events",
            Self::ReadProducts => "read_products",
            Self::PutProduct => "put_product",
        };
        f.write_str(name)
    }
}

/// Uniqueness rules enforced by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constraint {
    /// A payment reference may be stored on at most one sale.
    PaymentReference,
    /// A sale holds at most one item per product.
    SaleProduct,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PaymentReference => f.write_str("sales_payment_reference_key"),
            Self::SaleProduct => f.write_str("unique_sale_product_per_sale"),
        }
    }
}

/// Error type returned by store operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Infrastructure failure surfaced by the backing store (connection drop,
    /// lost transaction, ...).
    #[error("{operation} operation failed")]
    StoreFailure {
        /// The failing operation
        operation: Operation,
    },

    /// A write targeted a row this unit of work never locked.
    #[error("{operation} requires {row} to be locked by the current unit of work")]
    RowNotLocked {
        /// The rejected operation
        operation: Operation,
        /// Human-readable row identity, e.g. `product 0190...`
        row: String,
    },

    /// A write would break one of the ledger's uniqueness rules.
    #[error("{operation} violated unique constraint {constraint}")]
    UniqueViolation {
        /// The rejected operation
        operation: Operation,
        /// The rule that was broken
        constraint: Constraint,
    },

    /// A stored row could not be turned back into a domain value.
    #[error("stored {entity} could not be decoded: {detail}")]
    Corrupted {
        /// Kind of row, e.g. `sale`
        entity: &'static str,
        /// What was wrong with it
        detail: String,
    },
}

impl StoreError {
    /// Shorthand for [`StoreError::Corrupted`].
    pub fn corrupted(entity: &'static str, detail: impl fmt::Display) -> Self {
        Self::Corrupted {
            entity,
            detail: detail.to_string(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Input that was rejected before any storage access.
#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    /// A sale must include at least one item.
    #[error("a sale must include at least one item")]
    EmptyCart,

    /// The same product was rung up twice in one cart.
    #[error("product {0} appears more than once in the cart")]
    DuplicateProduct(ProductId),

    /// The paid amount is not exactly the sale total.
    #[error("amount {provided} does not match the sale total {expected}")]
    AmountMismatch {
        /// The sale's total
        expected: Money,
        /// The amount reported by the payment
        provided: Money,
    },

    /// Quantity was zero.
    #[error("invalid quantity: {0}")]
    Quantity(#[from] QuantityError),

    /// Amount was negative, too precise, or too large.
    #[error("invalid amount: {0}")]
    Money(#[from] MoneyError),

    /// Payment reference was blank or too long.
    #[error("invalid payment reference: {0}")]
    PaymentReference(#[from] PaymentReferenceError),

    /// Payment method was blank or too long.
    #[error("invalid payment method: {0}")]
    PaymentMethod(#[from] PaymentMethodError),

    /// Cancellation reason was blank or too long.
    #[error("invalid cancellation reason: {0}")]
    CancellationReason(#[from] CancellationReasonError),

    /// Search text was blank or too long.
    #[error("invalid search query: {0}")]
    SearchQuery(#[from] SearchQueryError),
}

/// Coarse classification of a [`SaleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; nothing was touched.
    Validation,
    /// Unknown product or sale.
    NotFound,
    /// Current state forbids the operation.
    Conflict,
    /// Persistence failure; the unit of work was rolled back.
    Storage,
}

/// Errors reported by the sale transaction engine.
///
/// Every variant is produced before the surrounding unit of work commits, so
/// an error always means "nothing changed".
#[derive(thiserror::Error, Debug)]
pub enum SaleError {
    /// Input was rejected before touching storage.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A cart line referenced a product the inventory does not hold.
    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    /// The sale does not exist or is not visible to the caller.
    #[error("sale {0} not found")]
    SaleNotFound(SaleId),

    /// Not enough units on hand for a cart line.
    #[error("insufficient stock for product {product_id} ({available} available)")]
    InsufficientStock {
        /// Product that ran short
        product_id: ProductId,
        /// Units asked for
        requested: Quantity,
        /// Units on hand when the row was locked
        available: u32,
    },

    /// Cancellation attempted on a sale that already left `PENDING`.
    #[error("only pending sales can be cancelled (sale {sale_id} is {status})")]
    NotPending {
        /// The sale
        sale_id: SaleId,
        /// Its current status
        status: SaleStatus,
    },

    /// Payment reported for a cancelled sale.
    #[error("sale {0} is cancelled and cannot be paid")]
    SaleCancelled(SaleId),

    /// The payment reference is already stored against another sale.
    #[error("payment reference {0} is already recorded against another sale")]
    DuplicatePaymentReference(PaymentReference),

    /// The store failed; the unit of work was rolled back.
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

impl SaleError {
    /// Classify the error for the calling layer.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::ProductNotFound(_) | Self::SaleNotFound(_) => ErrorKind::NotFound,
            Self::InsufficientStock { .. }
            | Self::NotPending { .. }
            | Self::SaleCancelled(_)
            | Self::DuplicatePaymentReference(_) => ErrorKind::Conflict,
            Self::Store(_) => ErrorKind::Storage,
        }
    }
}

impl From<MoneyError> for SaleError {
    fn from(error: MoneyError) -> Self {
        Self::Validation(ValidationError::Money(error))
    }
}
