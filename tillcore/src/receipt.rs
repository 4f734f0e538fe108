//! Operation results: receipts, till checkout summaries and payment
//! outcomes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tillcore_types::{
    Money, ProductId, ProductName, Quantity, Sale, SaleDetails, SaleId, SaleStatus, UserId,
};

use crate::config::ReceiptPrefix;

/// Printable receipt number, e.g. `RCP-000042`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptNumber(String);

impl ReceiptNumber {
    /// Receipt number of a sale, zero-padded to six digits.
    pub fn new(prefix: &ReceiptPrefix, sale_id: SaleId) -> Self {
        Self(format!("{prefix}-{:06}", sale_id.into_inner()))
    }

    /// The number as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One printed line of a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    /// Product sold
    pub product_id: ProductId,
    /// Product name at the time the receipt was produced
    pub name: ProductName,
    /// Units sold
    pub quantity: Quantity,
    /// Unit price charged
    pub unit_price: Money,
    /// `unit_price * quantity`
    pub line_total: Money,
}

/// Receipt data for printing at the till.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Receipt number
    pub receipt_number: ReceiptNumber,
    /// When the sale was recorded
    pub issued_at: DateTime<Utc>,
    /// Vendor who recorded the sale
    pub vendor: UserId,
    /// Sold lines in till order
    pub lines: Vec<ReceiptLine>,
    /// Sum of line totals
    pub subtotal: Money,
    /// Amount due
    pub total: Money,
    /// Sale status when the receipt was produced
    pub status: SaleStatus,
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.receipt_number)?;
        writeln!(f, "{}", self.issued_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "vendor {}", self.vendor)?;
        for line in &self.lines {
            writeln!(
                f,
                "{} x{} @ {} = {}",
                line.name, line.quantity, line.unit_price, line.line_total
            )?;
        }
        writeln!(f, "subtotal {}", self.subtotal)?;
        writeln!(f, "total {}", self.total)?;
        write!(f, "status {}", self.status)
    }
}

/// Result of a one-step till checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickSaleReceipt {
    /// The recorded sale and its items
    pub details: SaleDetails,
    /// Amount tendered by the customer
    pub payment_received: Money,
    /// Change due; zero when the tender fell short
    pub change: Money,
    /// Receipt number to print
    pub receipt_number: ReceiptNumber,
}

impl QuickSaleReceipt {
    /// `COMPLETED` when the tender covered the total, otherwise `PENDING`.
    pub const fn status(&self) -> SaleStatus {
        self.details.sale.status
    }

    /// Number of lines on the sale.
    pub fn item_count(&self) -> usize {
        self.details.items.len()
    }
}

/// How a mark-paid request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentDisposition {
    /// The sale moved to `COMPLETED` and a payment event was recorded.
    Completed,
    /// The sale was already completed; nothing changed.
    AlreadyCompleted,
    /// This payment reference was already stored on the sale; nothing
    /// changed.
    AlreadyRecorded,
}

impl PaymentDisposition {
    /// Operator-facing message.
    pub const fn detail(self) -> &'static str {
        match self {
            Self::Completed => "Sale is marked as completed.",
            Self::AlreadyCompleted => "Sale already completed.",
            Self::AlreadyRecorded => "Payment already recorded.",
        }
    }

    /// Whether this call recorded the payment.
    pub const fn recorded_payment(self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Outcome of [`SaleEngine::mark_paid`](crate::SaleEngine::mark_paid).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOutcome {
    /// The sale as stored after the call
    pub sale: Sale,
    /// What the call did
    pub disposition: PaymentDisposition,
}
