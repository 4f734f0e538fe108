//! `TillCore` - sale transaction engine for point-of-sale backends
//!
//! Given a cart of line items, [`SaleEngine::create_sale`] atomically locks
//! the affected inventory rows, checks stock, computes totals, decrements
//! stock, persists the sale with its items, and appends an audit event.
//! [`SaleEngine::cancel`] reverses that effect and [`SaleEngine::mark_paid`]
//! finalizes it. Each operation runs in a single unit of work opened on a
//! [`SaleStore`]; a failure at any step leaves the store unchanged.
//!
//! # Example
//!
//! ```rust,ignore
//! use tillcore::{CartLine, SaleEngine, Quantity};
//! use tillcore_memory::InMemorySaleStore;
//!
//! let engine = SaleEngine::new(InMemorySaleStore::new());
//! let details = engine
//!     .create_sale(vendor, vec![CartLine::new(product_id, Quantity::try_new(3)?)], None)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cart;
mod config;
mod engine;
mod receipt;

pub use cart::{CartLine, Tender};
pub use config::{EngineConfig, PosReferencePrefix, ReceiptPrefix, SearchLimit};
pub use engine::SaleEngine;
pub use receipt::{
    PaymentDisposition, PaymentOutcome, QuickSaleReceipt, Receipt, ReceiptLine, ReceiptNumber,
};

pub use tillcore_types::*;
