//! In-memory store for the `TillCore` sale transaction engine
//!
//! This crate provides an in-memory implementation of the `SaleStore` and
//! `ProductCatalog` ports from `tillcore-types`, useful for testing and
//! development scenarios where persistence is not required.
//!
//! Row locking is real: every product and sale row carries a
//! `tokio::sync::Mutex` whose owned guard is held by the unit of work that
//! locked it, so concurrent checkouts serialize exactly as they would
//! against `SELECT ... FOR UPDATE`. Writes are staged on the unit of work
//! and applied on commit; dropping an uncommitted unit of work discards them
//! and releases its locks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::mem;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tillcore_types::{
    Constraint, InventoryTransaction, LedgerTransaction, Money, NewSaleEvent, Operation,
    PaymentReference, Product, ProductCatalog, ProductId, Sale, SaleEvent, SaleEventId, SaleId,
    SaleItem, SaleScope, SaleStatus, SaleStore, SearchQuery, StockUpdate, StoreError, StoreResult,
    UnitOfWork, UserId,
};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::debug;

/// A committed value plus the lock that guards changes to it.
struct Row<T> {
    lock: Arc<RowLock<()>>,
    value: T,
}

impl<T> Row<T> {
    fn new(value: T) -> Self {
        Self {
            lock: Arc::new(RowLock::new(())),
            value,
        }
    }
}

#[derive(Default)]
struct Tables {
    products: RwLock<BTreeMap<ProductId, Row<Product>>>,
    sales: RwLock<BTreeMap<SaleId, Row<Sale>>>,
    items: RwLock<BTreeMap<SaleId, Vec<SaleItem>>>,
    events: RwLock<BTreeMap<SaleId, Vec<SaleEvent>>>,
    // Owner of every stored or in-flight payment reference.
    payment_references: Mutex<HashMap<PaymentReference, SaleId>>,
    sale_sequence: AtomicI64,
    event_sequence: AtomicI64,
}

impl Tables {
    fn next_sale_id(&self) -> StoreResult<SaleId> {
        let raw = self.sale_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        SaleId::try_new(raw).map_err(|error| StoreError::corrupted("sale sequence", error))
    }

    fn next_event_id(&self) -> StoreResult<SaleEventId> {
        let raw = self.event_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        SaleEventId::try_new(raw).map_err(|error| StoreError::corrupted("event sequence", error))
    }
}

/// Thread-safe in-memory sale store with pessimistic row locks.
///
/// Cloning is cheap and every clone shares the same tables.
#[derive(Clone, Default)]
pub struct InMemorySaleStore {
    tables: Arc<Tables>,
}

impl InMemorySaleStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose catalog already holds `products`.
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let store = Self::new();
        {
            let mut table = store.tables.products.write();
            for product in products {
                let _ = table.insert(product.id, Row::new(product));
            }
        }
        store
    }
}

impl std::fmt::Debug for InMemorySaleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySaleStore")
            .field("products", &self.tables.products.read().len())
            .field("sales", &self.tables.sales.read().len())
            .finish()
    }
}

#[async_trait]
impl SaleStore for InMemorySaleStore {
    type UnitOfWork = InMemoryUnitOfWork;

    async fn begin(&self) -> StoreResult<Self::UnitOfWork> {
        Ok(InMemoryUnitOfWork::new(Arc::clone(&self.tables)))
    }

    async fn sale(&self, sale_id: SaleId) -> StoreResult<Option<Sale>> {
        let sales = self.tables.sales.read();
        Ok(sales.get(&sale_id).map(|row| row.value.clone()))
    }

    async fn sale_items(&self, sale_id: SaleId) -> StoreResult<Vec<SaleItem>> {
        let items = self.tables.items.read();
        Ok(items.get(&sale_id).cloned().unwrap_or_default())
    }

    async fn sale_events(&self, sale_id: SaleId) -> StoreResult<Vec<SaleEvent>> {
        let events = self.tables.events.read();
        Ok(events.get(&sale_id).cloned().unwrap_or_default())
    }

    async fn list_sales(&self, scope: SaleScope) -> StoreResult<Vec<Sale>> {
        let sales = self.tables.sales.read();
        // Ids are sequence-assigned, so reverse id order is newest first.
        Ok(sales
            .values()
            .rev()
            .map(|row| &row.value)
            .filter(|sale| match scope {
                SaleScope::All => true,
                SaleScope::Vendor(vendor) => sale.vendor == vendor,
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProductCatalog for InMemorySaleStore {
    async fn products(&self, product_ids: &BTreeSet<ProductId>) -> StoreResult<Vec<Product>> {
        let products = self.tables.products.read();
        Ok(product_ids
            .iter()
            .filter_map(|id| products.get(id).map(|row| row.value.clone()))
            .collect())
    }

    async fn search_products(
        &self,
        query: &SearchQuery,
        limit: usize,
    ) -> StoreResult<Vec<Product>> {
        let needle = query.to_lowercase();
        let products = self.tables.products.read();
        let mut matches: Vec<Product> = products
            .values()
            .map(|row| &row.value)
            .filter(|product| product.is_available)
            .filter(|product| product.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.name.as_ref().cmp(b.name.as_ref()).then(a.id.cmp(&b.id)));
        matches.truncate(limit);
        Ok(matches)
    }

    /// Seeding hook; replaces the committed value without taking the row
    /// lock.
    async fn put_product(&self, product: Product) -> StoreResult<()> {
        let mut products = self.tables.products.write();
        match products.get_mut(&product.id) {
            Some(row) => row.value = product,
            None => {
                let _ = products.insert(product.id, Row::new(product));
            }
        }
        Ok(())
    }
}

/// Unit of work over an [`InMemorySaleStore`].
///
/// Holds the row locks it acquired and every staged write. Dropping it
/// without calling [`UnitOfWork::commit`] rolls back.
pub struct InMemoryUnitOfWork {
    tables: Arc<Tables>,
    product_guards: BTreeMap<ProductId, OwnedMutexGuard<()>>,
    sale_guards: BTreeMap<SaleId, OwnedMutexGuard<()>>,
    // Locked products with staged stock applied.
    products: BTreeMap<ProductId, Product>,
    // Locked or newly created sales with staged changes applied.
    sales: BTreeMap<SaleId, Sale>,
    created_sales: BTreeSet<SaleId>,
    items: BTreeMap<SaleId, Vec<SaleItem>>,
    events: Vec<SaleEvent>,
    reserved_references: Vec<PaymentReference>,
}

impl InMemoryUnitOfWork {
    fn new(tables: Arc<Tables>) -> Self {
        Self {
            tables,
            product_guards: BTreeMap::new(),
            sale_guards: BTreeMap::new(),
            products: BTreeMap::new(),
            sales: BTreeMap::new(),
            created_sales: BTreeSet::new(),
            items: BTreeMap::new(),
            events: Vec::new(),
            reserved_references: Vec::new(),
        }
    }

    fn locked_sale_mut(&mut self, sale_id: SaleId, operation: Operation) -> StoreResult<&mut Sale> {
        self.sales
            .get_mut(&sale_id)
            .ok_or_else(|| StoreError::RowNotLocked {
                operation,
                row: format!("sale {sale_id}"),
            })
    }

    fn reserve_reference(
        &mut self,
        sale_id: SaleId,
        reference: &PaymentReference,
    ) -> StoreResult<()> {
        let mut owners = self.tables.payment_references.lock();
        match owners.get(reference) {
            Some(owner) if *owner == sale_id => Ok(()),
            Some(_) => Err(StoreError::UniqueViolation {
                operation: Operation::UpdateSaleStatus,
                constraint: Constraint::PaymentReference,
            }),
            None => {
                let _ = owners.insert(reference.clone(), sale_id);
                self.reserved_references.push(reference.clone());
                Ok(())
            }
        }
    }
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        if self.reserved_references.is_empty() {
            return;
        }
        let mut owners = self.tables.payment_references.lock();
        for reference in self.reserved_references.drain(..) {
            let _ = owners.remove(&reference);
        }
    }
}

#[async_trait]
impl InventoryTransaction for InMemoryUnitOfWork {
    async fn lock_and_fetch(
        &mut self,
        product_ids: &BTreeSet<ProductId>,
    ) -> StoreResult<BTreeMap<ProductId, Product>> {
        // BTreeSet iteration is ascending, which fixes the lock order.
        for product_id in product_ids {
            if self.product_guards.contains_key(product_id) {
                continue;
            }
            let lock = {
                let products = self.tables.products.read();
                products.get(product_id).map(|row| Arc::clone(&row.lock))
            };
            let Some(lock) = lock else {
                continue;
            };
            let guard = lock.lock_owned().await;
            let current = self
                .tables
                .products
                .read()
                .get(product_id)
                .map(|row| row.value.clone());
            if let Some(product) = current {
                let _ = self.product_guards.insert(*product_id, guard);
                let _ = self.products.insert(*product_id, product);
            }
        }

        Ok(product_ids
            .iter()
            .filter_map(|id| self.products.get(id).map(|product| (*id, product.clone())))
            .collect())
    }

    async fn batch_update_stock(&mut self, updates: &[StockUpdate]) -> StoreResult<()> {
        if let Some(update) = updates
            .iter()
            .find(|update| !self.products.contains_key(&update.product_id))
        {
            return Err(StoreError::RowNotLocked {
                operation: Operation::UpdateStock,
                row: format!("product {}", update.product_id),
            });
        }
        for update in updates {
            if let Some(product) = self.products.get_mut(&update.product_id) {
                product.stock = update.stock;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryUnitOfWork {
    async fn create_sale(&mut self, vendor: UserId, notes: Option<String>) -> StoreResult<Sale> {
        let sale = Sale::open(self.tables.next_sale_id()?, vendor, notes, Utc::now());
        let _ = self.created_sales.insert(sale.id);
        let _ = self.sales.insert(sale.id, sale.clone());
        Ok(sale)
    }

    async fn batch_create_items(&mut self, items: &[SaleItem]) -> StoreResult<()> {
        for item in items {
            let _ = self.locked_sale_mut(item.sale_id(), Operation::CreateItems)?;
        }

        let mut seen: BTreeSet<(SaleId, ProductId)> = {
            let committed = self.tables.items.read();
            items
                .iter()
                .map(SaleItem::sale_id)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .flat_map(|sale_id| committed.get(&sale_id).cloned().unwrap_or_default())
                .chain(self.items.values().flatten().cloned())
                .map(|item| (item.sale_id(), item.product_id()))
                .collect()
        };
        for item in items {
            if !seen.insert((item.sale_id(), item.product_id())) {
                return Err(StoreError::UniqueViolation {
                    operation: Operation::CreateItems,
                    constraint: Constraint::SaleProduct,
                });
            }
        }

        for item in items {
            self.items.entry(item.sale_id()).or_default().push(item.clone());
        }
        Ok(())
    }

    async fn update_sale_total(&mut self, sale_id: SaleId, total: Money) -> StoreResult<Sale> {
        let sale = self.locked_sale_mut(sale_id, Operation::UpdateSaleTotal)?;
        sale.total_amount = total;
        sale.updated_at = Utc::now();
        Ok(sale.clone())
    }

    async fn lock_sale(&mut self, sale_id: SaleId) -> StoreResult<Option<Sale>> {
        if let Some(sale) = self.sales.get(&sale_id) {
            return Ok(Some(sale.clone()));
        }
        let lock = {
            let sales = self.tables.sales.read();
            sales.get(&sale_id).map(|row| Arc::clone(&row.lock))
        };
        let Some(lock) = lock else {
            return Ok(None);
        };
        let guard = lock.lock_owned().await;
        let current = self
            .tables
            .sales
            .read()
            .get(&sale_id)
            .map(|row| row.value.clone());
        if let Some(sale) = &current {
            let _ = self.sale_guards.insert(sale_id, guard);
            let _ = self.sales.insert(sale_id, sale.clone());
        }
        Ok(current)
    }

    async fn sale_items(&mut self, sale_id: SaleId) -> StoreResult<Vec<SaleItem>> {
        let mut items = self
            .tables
            .items
            .read()
            .get(&sale_id)
            .cloned()
            .unwrap_or_default();
        if let Some(staged) = self.items.get(&sale_id) {
            items.extend(staged.iter().cloned());
        }
        Ok(items)
    }

    async fn update_sale_status(
        &mut self,
        sale_id: SaleId,
        status: SaleStatus,
        payment_reference: Option<PaymentReference>,
    ) -> StoreResult<Sale> {
        let _ = self.locked_sale_mut(sale_id, Operation::UpdateSaleStatus)?;
        if let Some(reference) = &payment_reference {
            self.reserve_reference(sale_id, reference)?;
        }
        let sale = self.locked_sale_mut(sale_id, Operation::UpdateSaleStatus)?;
        sale.status = status;
        if payment_reference.is_some() {
            sale.payment_reference = payment_reference;
        }
        sale.updated_at = Utc::now();
        Ok(sale.clone())
    }

    async fn append_event(&mut self, event: NewSaleEvent) -> StoreResult<SaleEvent> {
        let known = self.sales.contains_key(&event.sale_id)
            || self.tables.sales.read().contains_key(&event.sale_id);
        if !known {
            return Err(StoreError::corrupted(
                "sale event",
                format!("sale {} does not exist", event.sale_id),
            ));
        }
        let recorded = SaleEvent {
            id: self.tables.next_event_id()?,
            sale_id: event.sale_id,
            actor: event.actor,
            payload: event.payload,
            recorded_at: Utc::now(),
        };
        self.events.push(recorded.clone());
        Ok(recorded)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(mut self) -> StoreResult<()> {
        let products = mem::take(&mut self.products);
        let sales = mem::take(&mut self.sales);
        let items = mem::take(&mut self.items);
        let events = mem::take(&mut self.events);
        let (stock_rows, sale_rows, item_rows, event_rows) =
            (products.len(), sales.len(), items.len(), events.len());

        {
            let mut table = self.tables.products.write();
            for (product_id, product) in products {
                if let Some(row) = table.get_mut(&product_id) {
                    row.value = product;
                }
            }
        }
        {
            let mut table = self.tables.sales.write();
            for (sale_id, sale) in sales {
                if self.created_sales.contains(&sale_id) {
                    let _ = table.insert(sale_id, Row::new(sale));
                } else if let Some(row) = table.get_mut(&sale_id) {
                    row.value = sale;
                }
            }
        }
        {
            let mut table = self.tables.items.write();
            for (sale_id, staged) in items {
                table.entry(sale_id).or_default().extend(staged);
            }
        }
        {
            let mut table = self.tables.events.write();
            for event in events {
                table.entry(event.sale_id).or_default().push(event);
            }
        }
        self.reserved_references.clear();

        debug!(
            stock_rows,
            sale_rows,
            item_rows,
            event_rows,
            "[memory.commit] unit of work committed"
        );
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        debug!(
            locked_products = self.product_guards.len(),
            locked_sales = self.sale_guards.len(),
            "[memory.rollback] unit of work discarded"
        );
        Ok(())
    }
}
