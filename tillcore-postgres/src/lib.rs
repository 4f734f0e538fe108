//! PostgreSQL store for the `TillCore` sale transaction engine
//!
//! Each [`PostgresUnitOfWork`] wraps one database transaction. Product and
//! sale rows are locked with `SELECT ... FOR UPDATE`, products always in
//! ascending id order within a single statement, so concurrent checkouts
//! serialize on the rows they share and never deadlock. Batched writes use
//! `UNNEST` so a sale costs a fixed number of round trips regardless of its
//! line count.
//!
//! Run [`PostgresSaleStore::migrate`] once before use to create the tables.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nutype::nutype;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{query, Pool, Postgres, Row, Transaction};
use thiserror::Error;
use tillcore_types::{
    Constraint, InventoryTransaction, LedgerTransaction, Money, NewSaleEvent, Operation,
    PaymentReference, Product, ProductCatalog, ProductId, ProductName, Quantity, Sale, SaleEvent,
    SaleEventId, SaleEventPayload, SaleId, SaleItem, SaleScope, SaleStatus, SaleStore,
    SearchQuery, StockUpdate, StoreError, StoreResult, UnitOfWork, UserId,
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const PAYMENT_REFERENCE_CONSTRAINT: &str = "tillcore_sales_payment_reference_key";
const SALE_PRODUCT_CONSTRAINT: &str = "tillcore_sale_items_sale_product_key";

/// Errors raised while setting up a [`PostgresSaleStore`].
#[derive(Debug, Error)]
pub enum PostgresSaleStoreError {
    /// The connection pool could not be created.
    #[error("failed to create postgres connection pool")]
    ConnectionFailed(#[source] sqlx::Error),
    /// The embedded migrations could not be applied.
    #[error("failed to apply postgres migrations")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),
}

/// Maximum number of database connections in the pool.
///
/// Backed by `NonZeroU32`, so an empty pool cannot be configured.
///
/// # Examples
///
/// ```ignore
/// use std::num::NonZeroU32;
/// use tillcore_postgres::MaxConnections;
///
/// let till_pool = MaxConnections::new(NonZeroU32::new(4).expect("4 is non-zero"));
/// ```
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(std::num::NonZeroU32);

/// Configuration for the [`PostgresSaleStore`] connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 30 seconds)
    pub acquire_timeout: Duration,
    /// Idle timeout for connections in the pool (default: 10 minutes)
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: std::num::NonZeroU32 = match std::num::NonZeroU32::new(10) {
            Some(v) => v,
            None => unreachable!(),
        };

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Sale ledger and inventory stored in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresSaleStore {
    pool: Pool<Postgres>,
}

impl PostgresSaleStore {
    /// Connect with the default pool configuration.
    pub async fn new<S: Into<String>>(connection_string: S) -> Result<Self, PostgresSaleStoreError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Connect with an explicit pool configuration.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresSaleStoreError> {
        let connection_string = connection_string.into();
        let max_connections: std::num::NonZeroU32 = config.max_connections.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&connection_string)
            .await
            .map_err(PostgresSaleStoreError::ConnectionFailed)?;
        Ok(Self { pool })
    }

    /// Use an existing pool, e.g. one shared with the rest of the backend.
    pub const fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Create or upgrade the ledger tables.
    #[instrument(name = "postgres.migrate", skip(self))]
    pub async fn migrate(&self) -> Result<(), PostgresSaleStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(PostgresSaleStoreError::MigrationFailed)?;
        info!("[postgres.migrate] sale ledger schema is up to date");
        Ok(())
    }
}

#[async_trait]
impl SaleStore for PostgresSaleStore {
    type UnitOfWork = PostgresUnitOfWork;

    #[instrument(name = "postgres.begin", skip(self))]
    async fn begin(&self) -> StoreResult<Self::UnitOfWork> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::BeginTransaction))?;
        Ok(PostgresUnitOfWork {
            tx,
            locked_products: BTreeSet::new(),
            locked_sales: BTreeSet::new(),
        })
    }

    #[instrument(name = "postgres.sale", skip(self))]
    async fn sale(&self, sale_id: SaleId) -> StoreResult<Option<Sale>> {
        query(
            "SELECT id, vendor_id, status, total_amount, payment_reference, notes, created_at, updated_at
             FROM tillcore_sales WHERE id = $1",
        )
        .bind(sale_id.into_inner())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::ReadSales))?
        .as_ref()
        .map(decode_sale)
        .transpose()
    }

    #[instrument(name = "postgres.sale_items", skip(self))]
    async fn sale_items(&self, sale_id: SaleId) -> StoreResult<Vec<SaleItem>> {
        query(
            "SELECT sale_id, product_id, quantity, unit_price, line_total
             FROM tillcore_sale_items WHERE sale_id = $1 ORDER BY id",
        )
        .bind(sale_id.into_inner())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::ReadItems))?
        .iter()
        .map(decode_item)
        .collect()
    }

    #[instrument(name = "postgres.sale_events", skip(self))]
    async fn sale_events(&self, sale_id: SaleId) -> StoreResult<Vec<SaleEvent>> {
        query(
            "SELECT id, sale_id, actor_id, payload, recorded_at
             FROM tillcore_sale_events WHERE sale_id = $1 ORDER BY id",
        )
        .bind(sale_id.into_inner())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::ReadEvents))?
        .iter()
        .map(decode_event)
        .collect()
    }

    #[instrument(name = "postgres.list_sales", skip(self))]
    async fn list_sales(&self, scope: SaleScope) -> StoreResult<Vec<Sale>> {
        let vendor = match scope {
            SaleScope::All => None,
            SaleScope::Vendor(vendor) => Some(vendor.into_inner()),
        };
        query(
            "SELECT id, vendor_id, status, total_amount, payment_reference, notes, created_at, updated_at
             FROM tillcore_sales
             WHERE ($1::BIGINT IS NULL OR vendor_id = $1)
             ORDER BY id DESC",
        )
        .bind(vendor)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::ReadSales))?
        .iter()
        .map(decode_sale)
        .collect()
    }
}

#[async_trait]
impl ProductCatalog for PostgresSaleStore {
    #[instrument(name = "postgres.products", skip_all, fields(products = product_ids.len()))]
    async fn products(&self, product_ids: &BTreeSet<ProductId>) -> StoreResult<Vec<Product>> {
        let ids: Vec<Uuid> = product_ids.iter().map(|id| id.into_inner()).collect();
        query(
            "SELECT id, name, price, stock, is_available
             FROM tillcore_products WHERE id = ANY($1) ORDER BY id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::ReadProducts))?
        .iter()
        .map(decode_product)
        .collect()
    }

    #[instrument(name = "postgres.search_products", skip(self))]
    async fn search_products(
        &self,
        query_text: &SearchQuery,
        limit: usize,
    ) -> StoreResult<Vec<Product>> {
        query(
            r#"SELECT id, name, price, stock, is_available
               FROM tillcore_products
               WHERE is_available AND name ILIKE $1
               ORDER BY name COLLATE "C", id
               LIMIT $2"#,
        )
        .bind(contains_pattern(query_text))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::ReadProducts))?
        .iter()
        .map(decode_product)
        .collect()
    }

    #[instrument(name = "postgres.put_product", skip_all, fields(product_id = %product.id))]
    async fn put_product(&self, product: Product) -> StoreResult<()> {
        let _ = query(
            "INSERT INTO tillcore_products (id, name, price, stock, is_available)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET
                 name = EXCLUDED.name,
                 price = EXCLUDED.price,
                 stock = EXCLUDED.stock,
                 is_available = EXCLUDED.is_available,
                 updated_at = now()",
        )
        .bind(product.id.into_inner())
        .bind(product.name.into_inner())
        .bind(product.price.amount())
        .bind(i64::from(product.stock))
        .bind(product.is_available)
        .execute(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::PutProduct))?;
        Ok(())
    }
}

/// One database transaction.
///
/// Dropping it without calling [`UnitOfWork::commit`] rolls the transaction
/// back and releases its row locks.
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
    locked_products: BTreeSet<ProductId>,
    // Locked with FOR UPDATE or inserted by this transaction.
    locked_sales: BTreeSet<SaleId>,
}

impl PostgresUnitOfWork {
    fn ensure_sale_locked(&self, sale_id: SaleId, operation: Operation) -> StoreResult<()> {
        if self.locked_sales.contains(&sale_id) {
            Ok(())
        } else {
            Err(StoreError::RowNotLocked {
                operation,
                row: format!("sale {sale_id}"),
            })
        }
    }
}

impl std::fmt::Debug for PostgresUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresUnitOfWork")
            .field("locked_products", &self.locked_products.len())
            .field("locked_sales", &self.locked_sales.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl InventoryTransaction for PostgresUnitOfWork {
    #[instrument(name = "postgres.lock_and_fetch", skip_all, fields(products = product_ids.len()))]
    async fn lock_and_fetch(
        &mut self,
        product_ids: &BTreeSet<ProductId>,
    ) -> StoreResult<BTreeMap<ProductId, Product>> {
        let ids: Vec<Uuid> = product_ids.iter().map(|id| id.into_inner()).collect();
        let rows = query(
            "SELECT id, name, price, stock, is_available
             FROM tillcore_products WHERE id = ANY($1)
             ORDER BY id
             FOR UPDATE",
        )
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::LockProducts))?;

        let mut locked = BTreeMap::new();
        for row in &rows {
            let product = decode_product(row)?;
            let _ = self.locked_products.insert(product.id);
            let _ = locked.insert(product.id, product);
        }
        debug!(
            requested = product_ids.len(),
            locked = locked.len(),
            "[postgres.lock_and_fetch] product rows locked"
        );
        Ok(locked)
    }

    #[instrument(name = "postgres.batch_update_stock", skip_all, fields(rows = updates.len()))]
    async fn batch_update_stock(&mut self, updates: &[StockUpdate]) -> StoreResult<()> {
        if let Some(update) = updates
            .iter()
            .find(|update| !self.locked_products.contains(&update.product_id))
        {
            return Err(StoreError::RowNotLocked {
                operation: Operation::UpdateStock,
                row: format!("product {}", update.product_id),
            });
        }
        if updates.is_empty() {
            return Ok(());
        }

        let ids: Vec<Uuid> = updates.iter().map(|u| u.product_id.into_inner()).collect();
        let stocks: Vec<i64> = updates.iter().map(|u| i64::from(u.stock)).collect();
        let _ = query(
            "UPDATE tillcore_products AS p
             SET stock = u.stock, updated_at = now()
             FROM UNNEST($1::UUID[], $2::BIGINT[]) AS u(id, stock)
             WHERE p.id = u.id",
        )
        .bind(ids)
        .bind(stocks)
        .execute(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::UpdateStock))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerTransaction for PostgresUnitOfWork {
    #[instrument(name = "postgres.create_sale", skip_all, fields(vendor = %vendor))]
    async fn create_sale(&mut self, vendor: UserId, notes: Option<String>) -> StoreResult<Sale> {
        let row = query(
            "INSERT INTO tillcore_sales (vendor_id, notes)
             VALUES ($1, $2)
             RETURNING id, vendor_id, status, total_amount, payment_reference, notes, created_at, updated_at",
        )
        .bind(vendor.into_inner())
        .bind(notes)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::CreateSale))?;

        let sale = decode_sale(&row)?;
        let _ = self.locked_sales.insert(sale.id);
        Ok(sale)
    }

    #[instrument(name = "postgres.batch_create_items", skip_all, fields(rows = items.len()))]
    async fn batch_create_items(&mut self, items: &[SaleItem]) -> StoreResult<()> {
        for item in items {
            self.ensure_sale_locked(item.sale_id(), Operation::CreateItems)?;
        }
        if items.is_empty() {
            return Ok(());
        }

        let sale_ids: Vec<i64> = items.iter().map(|i| i.sale_id().into_inner()).collect();
        let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id().into_inner()).collect();
        let quantities: Vec<i64> = items
            .iter()
            .map(|i| i64::from(i.quantity().into_inner()))
            .collect();
        let unit_prices: Vec<Decimal> = items.iter().map(|i| i.unit_price().amount()).collect();
        let line_totals: Vec<Decimal> = items.iter().map(|i| i.line_total().amount()).collect();

        let _ = query(
            "INSERT INTO tillcore_sale_items (sale_id, product_id, quantity, unit_price, line_total)
             SELECT * FROM UNNEST($1::BIGINT[], $2::UUID[], $3::BIGINT[], $4::NUMERIC[], $5::NUMERIC[])",
        )
        .bind(sale_ids)
        .bind(product_ids)
        .bind(quantities)
        .bind(unit_prices)
        .bind(line_totals)
        .execute(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::CreateItems))?;
        Ok(())
    }

    #[instrument(name = "postgres.update_sale_total", skip(self))]
    async fn update_sale_total(&mut self, sale_id: SaleId, total: Money) -> StoreResult<Sale> {
        self.ensure_sale_locked(sale_id, Operation::UpdateSaleTotal)?;
        let row = query(
            "UPDATE tillcore_sales SET total_amount = $2, updated_at = now()
             WHERE id = $1
             RETURNING id, vendor_id, status, total_amount, payment_reference, notes, created_at, updated_at",
        )
        .bind(sale_id.into_inner())
        .bind(total.amount())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::UpdateSaleTotal))?;
        decode_sale(&row)
    }

    #[instrument(name = "postgres.lock_sale", skip(self))]
    async fn lock_sale(&mut self, sale_id: SaleId) -> StoreResult<Option<Sale>> {
        let row = query(
            "SELECT id, vendor_id, status, total_amount, payment_reference, notes, created_at, updated_at
             FROM tillcore_sales WHERE id = $1
             FOR UPDATE",
        )
        .bind(sale_id.into_inner())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::LockSale))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let sale = decode_sale(&row)?;
        let _ = self.locked_sales.insert(sale.id);
        Ok(Some(sale))
    }

    #[instrument(name = "postgres.tx_sale_items", skip(self))]
    async fn sale_items(&mut self, sale_id: SaleId) -> StoreResult<Vec<SaleItem>> {
        query(
            "SELECT sale_id, product_id, quantity, unit_price, line_total
             FROM tillcore_sale_items WHERE sale_id = $1 ORDER BY id",
        )
        .bind(sale_id.into_inner())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::ReadItems))?
        .iter()
        .map(decode_item)
        .collect()
    }

    #[instrument(name = "postgres.update_sale_status", skip(self))]
    async fn update_sale_status(
        &mut self,
        sale_id: SaleId,
        status: SaleStatus,
        payment_reference: Option<PaymentReference>,
    ) -> StoreResult<Sale> {
        self.ensure_sale_locked(sale_id, Operation::UpdateSaleStatus)?;
        let row = query(
            "UPDATE tillcore_sales
             SET status = $2,
                 payment_reference = COALESCE($3, payment_reference),
                 updated_at = now()
             WHERE id = $1
             RETURNING id, vendor_id, status, total_amount, payment_reference, notes, created_at, updated_at",
        )
        .bind(sale_id.into_inner())
        .bind(status.as_str())
        .bind(payment_reference.map(PaymentReference::into_inner))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::UpdateSaleStatus))?;
        decode_sale(&row)
    }

    #[instrument(
        name = "postgres.append_event",
        skip_all,
        fields(sale_id = %event.sale_id, event_type = %event.payload.event_type())
    )]
    async fn append_event(&mut self, event: NewSaleEvent) -> StoreResult<SaleEvent> {
        let payload = serde_json::to_value(&event.payload)
            .map_err(|error| StoreError::corrupted("sale event", error))?;
        let row = query(
            "INSERT INTO tillcore_sale_events (sale_id, event_type, actor_id, payload)
             VALUES ($1, $2, $3, $4)
             RETURNING id, recorded_at",
        )
        .bind(event.sale_id.into_inner())
        .bind(event.payload.event_type().as_str())
        .bind(event.actor.map(UserId::into_inner))
        .bind(Json(payload))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::AppendEvent))?;

        let id: i64 = column(&row, "id", "sale event")?;
        let recorded_at: DateTime<Utc> = column(&row, "recorded_at", "sale event")?;
        Ok(SaleEvent {
            id: SaleEventId::try_new(id).map_err(|e| StoreError::corrupted("sale event", e))?,
            sale_id: event.sale_id,
            actor: event.actor,
            payload: event.payload,
            recorded_at,
        })
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    #[instrument(name = "postgres.commit", skip_all)]
    async fn commit(self) -> StoreResult<()> {
        let (products, sales) = (self.locked_products.len(), self.locked_sales.len());
        self.tx
            .commit()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::CommitTransaction))?;
        debug!(products, sales, "[postgres.commit] transaction committed");
        Ok(())
    }

    #[instrument(name = "postgres.rollback", skip_all)]
    async fn rollback(self) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::RollbackTransaction))?;
        debug!("[postgres.rollback] transaction rolled back");
        Ok(())
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str, entity: &'static str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|error| StoreError::corrupted(entity, format!("column {name}: {error}")))
}

fn decode_product(row: &PgRow) -> StoreResult<Product> {
    const ENTITY: &str = "product";
    let id: Uuid = column(row, "id", ENTITY)?;
    let name: String = column(row, "name", ENTITY)?;
    let price: Decimal = column(row, "price", ENTITY)?;
    let stock: i64 = column(row, "stock", ENTITY)?;

    Ok(Product {
        id: ProductId::new(id),
        name: ProductName::try_new(name).map_err(|e| StoreError::corrupted(ENTITY, e))?,
        price: Money::new(price).map_err(|e| StoreError::corrupted(ENTITY, e))?,
        stock: u32::try_from(stock).map_err(|e| StoreError::corrupted(ENTITY, e))?,
        is_available: column(row, "is_available", ENTITY)?,
    })
}

fn decode_sale(row: &PgRow) -> StoreResult<Sale> {
    const ENTITY: &str = "sale";
    let id: i64 = column(row, "id", ENTITY)?;
    let vendor: i64 = column(row, "vendor_id", ENTITY)?;
    let status: String = column(row, "status", ENTITY)?;
    let total: Decimal = column(row, "total_amount", ENTITY)?;
    let reference: Option<String> = column(row, "payment_reference", ENTITY)?;

    Ok(Sale {
        id: SaleId::try_new(id).map_err(|e| StoreError::corrupted(ENTITY, e))?,
        vendor: UserId::try_new(vendor).map_err(|e| StoreError::corrupted(ENTITY, e))?,
        status: status
            .parse()
            .map_err(|e| StoreError::corrupted(ENTITY, e))?,
        total_amount: Money::new(total).map_err(|e| StoreError::corrupted(ENTITY, e))?,
        payment_reference: reference
            .map(PaymentReference::try_new)
            .transpose()
            .map_err(|e| StoreError::corrupted(ENTITY, e))?,
        notes: column(row, "notes", ENTITY)?,
        created_at: column(row, "created_at", ENTITY)?,
        updated_at: column(row, "updated_at", ENTITY)?,
    })
}

fn decode_item(row: &PgRow) -> StoreResult<SaleItem> {
    const ENTITY: &str = "sale item";
    let sale_id: i64 = column(row, "sale_id", ENTITY)?;
    let product_id: Uuid = column(row, "product_id", ENTITY)?;
    let quantity: i64 = column(row, "quantity", ENTITY)?;
    let unit_price: Decimal = column(row, "unit_price", ENTITY)?;
    let line_total: Decimal = column(row, "line_total", ENTITY)?;

    let quantity = u32::try_from(quantity).map_err(|e| StoreError::corrupted(ENTITY, e))?;
    let item = SaleItem::new(
        SaleId::try_new(sale_id).map_err(|e| StoreError::corrupted(ENTITY, e))?,
        ProductId::new(product_id),
        Quantity::try_new(quantity).map_err(|e| StoreError::corrupted(ENTITY, e))?,
        Money::new(unit_price).map_err(|e| StoreError::corrupted(ENTITY, e))?,
    )
    .map_err(|e| StoreError::corrupted(ENTITY, e))?;

    if item.line_total().amount() != line_total {
        return Err(StoreError::corrupted(
            ENTITY,
            format!("stored line total {line_total} != {}", item.line_total()),
        ));
    }
    Ok(item)
}

fn decode_event(row: &PgRow) -> StoreResult<SaleEvent> {
    const ENTITY: &str = "sale event";
    let id: i64 = column(row, "id", ENTITY)?;
    let sale_id: i64 = column(row, "sale_id", ENTITY)?;
    let actor: Option<i64> = column(row, "actor_id", ENTITY)?;
    let Json(payload): Json<Value> = column(row, "payload", ENTITY)?;

    Ok(SaleEvent {
        id: SaleEventId::try_new(id).map_err(|e| StoreError::corrupted(ENTITY, e))?,
        sale_id: SaleId::try_new(sale_id).map_err(|e| StoreError::corrupted(ENTITY, e))?,
        actor: actor
            .map(UserId::try_new)
            .transpose()
            .map_err(|e| StoreError::corrupted(ENTITY, e))?,
        payload: serde_json::from_value::<SaleEventPayload>(payload)
            .map_err(|e| StoreError::corrupted(ENTITY, e))?,
        recorded_at: column(row, "recorded_at", ENTITY)?,
    })
}

/// `ILIKE` pattern matching `text` anywhere, with wildcards in `text`
/// taken literally.
fn contains_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

fn unique_constraint(name: &str) -> Option<Constraint> {
    match name {
        PAYMENT_REFERENCE_CONSTRAINT => Some(Constraint::PaymentReference),
        SALE_PRODUCT_CONSTRAINT => Some(Constraint::SaleProduct),
        _ => None,
    }
}

fn map_sqlx_error(error: sqlx::Error, operation: Operation) -> StoreError {
    if let sqlx::Error::Database(db_error) = &error {
        let code = db_error.code();
        // 23505: unique_violation
        if code.as_deref() == Some("23505") {
            if let Some(constraint) = db_error.constraint().and_then(unique_constraint) {
                warn!(
                    error = %db_error,
                    %constraint,
                    "[postgres.unique_violation] write rejected by unique constraint"
                );
                return StoreError::UniqueViolation {
                    operation,
                    constraint,
                };
            }
        }
        // 23503: foreign_key_violation
        if code.as_deref() == Some("23503") {
            return StoreError::corrupted("row reference", db_error);
        }
    }

    error!(
        error = %error,
        operation = %operation,
        "[postgres.database_error] database operation failed"
    );
    StoreError::StoreFailure { operation }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let config = PostgresConfig::default();

        let max: std::num::NonZeroU32 = config.max_connections.into();
        assert_eq!(max.get(), 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
    }

    #[test]
    fn search_pattern_escapes_like_wildcards() {
        assert_eq!(contains_pattern("tea"), "%tea%");
        assert_eq!(contains_pattern("50%_off"), r"%50\%\_off%");
        assert_eq!(contains_pattern(r"a\b"), r"%a\\b%");
    }

    #[test]
    fn only_ledger_constraints_are_reported_as_unique_violations() {
        assert_eq!(
            unique_constraint("tillcore_sales_payment_reference_key"),
            Some(Constraint::PaymentReference)
        );
        assert_eq!(
            unique_constraint("tillcore_sale_items_sale_product_key"),
            Some(Constraint::SaleProduct)
        );
        assert_eq!(unique_constraint("tillcore_products_pkey"), None);
    }
}
