#![forbid(unsafe_code)]
#![deny(
    bad_style,
    non_ascii_idents,
    rust_2018_idioms,
    unreachable_code,
    unused_imports,
    unused_must_use,
    unused_mut
)]

//! Shared vocabulary types and store ports for the `TillCore` sale
//! transaction engine.
//!
//! This crate provides the types shared between the `tillcore` engine and
//! storage backends such as `tillcore-memory` and `tillcore-postgres`.
//! Keeping them in a separate crate lets backends depend on the ports without
//! depending on the engine.
//!
//! # Overview
//!
//! - Value types: `ProductId`, `SaleId`, `UserId`, `Money`, `Quantity`,
//!   `PaymentReference`, `PaymentMethod`, `CancellationReason`, `SearchQuery`
//! - Entities: `Product`, `Sale`, `SaleItem`, `SaleDetails`, `SaleEvent`
//! - Store ports: `SaleStore`, `ProductCatalog`, `UnitOfWork`,
//!   `InventoryTransaction`, `LedgerTransaction`
//! - Errors: `SaleError`, `ValidationError`, `StoreError`, `Operation`

mod errors;
mod sale;
mod store;
mod types;

pub use errors::{
    Constraint, ErrorKind, Operation, SaleError, StoreError, StoreResult, ValidationError,
};
pub use sale::{
    NewSaleEvent, Product, Sale, SaleDetails, SaleEvent, SaleEventPayload, SaleEventType,
    SaleItem, SaleStatus, StockUpdate, UnknownSaleStatus,
};
pub use store::{
    InventoryTransaction, LedgerTransaction, ProductCatalog, SaleScope, SaleStore, UnitOfWork,
};
pub use types::{
    CancellationReason, CancellationReasonError, Money, MoneyError, PaymentMethod,
    PaymentMethodError, PaymentReference, PaymentReferenceError, ProductId, ProductName,
    ProductNameError, Quantity, QuantityError, SaleEventId, SaleEventIdError, SaleId, SaleIdError,
    SearchQuery, SearchQueryError, UserId, UserIdError,
};
