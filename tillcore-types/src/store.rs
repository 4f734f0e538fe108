//! Store ports for the `TillCore` sale transaction engine.
//!
//! The engine never talks to a database directly. It opens a [`UnitOfWork`]
//! through [`SaleStore::begin`], performs every read-lock-mutate step on that
//! handle, and either commits it or lets it roll back. Backends implement
//! these traits; `tillcore-memory` and `tillcore-postgres` ship with the
//! workspace.
//!
//! # Locking discipline
//!
//! - [`InventoryTransaction::lock_and_fetch`] takes exclusive row locks in
//!   ascending [`ProductId`] order, blocking until any holder finishes.
//! - [`LedgerTransaction::lock_sale`] takes an exclusive lock on one sale.
//! - Locks are held until the unit of work commits, rolls back, or is
//!   dropped.
//! - Dropping a unit of work without committing discards every staged write.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::errors::StoreResult;
use crate::sale::{
    NewSaleEvent, Product, Sale, SaleEvent, SaleItem, SaleStatus, StockUpdate,
};
use crate::types::{Money, PaymentReference, ProductId, SaleId, SearchQuery, UserId};

/// Inventory half of a unit of work.
#[async_trait]
pub trait InventoryTransaction: Send {
    /// Exclusively lock the given products and return their current state.
    ///
    /// Rows are locked in ascending id order in a single batch. Ids that do
    /// not exist are simply absent from the returned map.
    async fn lock_and_fetch(
        &mut self,
        product_ids: &BTreeSet<ProductId>,
    ) -> StoreResult<BTreeMap<ProductId, Product>>;

    /// Write new stock levels for products locked by this unit of work.
    async fn batch_update_stock(&mut self, updates: &[StockUpdate]) -> StoreResult<()>;
}

/// Ledger half of a unit of work.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Insert a pending sale with a zero total. The new row is locked by this
    /// unit of work.
    async fn create_sale(&mut self, vendor: UserId, notes: Option<String>) -> StoreResult<Sale>;

    /// Insert all items of a sale.
    async fn batch_create_items(&mut self, items: &[SaleItem]) -> StoreResult<()>;

    /// Set a locked sale's total.
    async fn update_sale_total(&mut self, sale_id: SaleId, total: Money) -> StoreResult<Sale>;

    /// Exclusively lock a sale, returning `None` if it does not exist.
    async fn lock_sale(&mut self, sale_id: SaleId) -> StoreResult<Option<Sale>>;

    /// Items of a sale as seen by this unit of work.
    async fn sale_items(&mut self, sale_id: SaleId) -> StoreResult<Vec<SaleItem>>;

    /// Change a locked sale's status, optionally storing a payment reference.
    ///
    /// `None` leaves any stored reference untouched. Storing a reference that
    /// another sale already holds fails with
    /// [`StoreError::UniqueViolation`](crate::StoreError::UniqueViolation).
    async fn update_sale_status(
        &mut self,
        sale_id: SaleId,
        status: SaleStatus,
        payment_reference: Option<PaymentReference>,
    ) -> StoreResult<Sale>;

    /// Append an audit event; visible only once the unit of work commits.
    async fn append_event(&mut self, event: NewSaleEvent) -> StoreResult<SaleEvent>;
}

/// An all-or-nothing scope over inventory and ledger writes.
#[async_trait]
pub trait UnitOfWork: InventoryTransaction + LedgerTransaction {
    /// Make every staged write durable and release all locks.
    async fn commit(self) -> StoreResult<()>;

    /// Discard every staged write and release all locks.
    async fn rollback(self) -> StoreResult<()>;
}

/// Which sales a listing should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleScope {
    /// Every sale (staff view).
    All,
    /// Sales recorded by one vendor.
    Vendor(UserId),
}

/// Persistent home of sales, their items and events.
///
/// Reads on this trait see committed state only and never block on row
/// locks.
#[async_trait]
pub trait SaleStore: Send + Sync {
    /// Unit of work type produced by [`SaleStore::begin`].
    type UnitOfWork: UnitOfWork + 'static;

    /// Open a new unit of work.
    async fn begin(&self) -> StoreResult<Self::UnitOfWork>;

    /// Committed sale by id.
    async fn sale(&self, sale_id: SaleId) -> StoreResult<Option<Sale>>;

    /// Committed items of a sale, in insertion order.
    async fn sale_items(&self, sale_id: SaleId) -> StoreResult<Vec<SaleItem>>;

    /// Committed events of a sale, oldest first.
    async fn sale_events(&self, sale_id: SaleId) -> StoreResult<Vec<SaleEvent>>;

    /// Committed sales in scope, newest first.
    async fn list_sales(&self, scope: SaleScope) -> StoreResult<Vec<Sale>>;
}

/// Read access to the product catalog, plus a seeding hook.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Committed products with the given ids; unknown ids are skipped.
    async fn products(&self, product_ids: &BTreeSet<ProductId>) -> StoreResult<Vec<Product>>;

    /// Available products whose name contains `query` (case-insensitive),
    /// ordered by name.
    async fn search_products(&self, query: &SearchQuery, limit: usize)
        -> StoreResult<Vec<Product>>;

    /// Insert or replace a catalog product.
    async fn put_product(&self, product: Product) -> StoreResult<()>;

    /// Committed product by id.
    async fn product(&self, product_id: ProductId) -> StoreResult<Option<Product>> {
        let ids = BTreeSet::from([product_id]);
        Ok(self.products(&ids).await?.into_iter().next())
    }
}
