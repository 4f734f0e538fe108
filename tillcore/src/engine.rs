//! The sale transaction engine.
//!
//! Every mutating operation follows the same shape: validate input without
//! touching storage, open one unit of work, lock the rows it needs, check
//! the business rules against the locked state, write, append an audit
//! event, and commit. Any error before the commit rolls the whole unit of
//! work back, so callers never observe a half-recorded sale.

use std::collections::{BTreeMap, BTreeSet};

use tillcore_types::{
    CancellationReason, Constraint, ErrorKind, Money, NewSaleEvent, PaymentReference, Product,
    ProductCatalog, ProductId, Sale, SaleDetails, SaleError, SaleEvent, SaleEventPayload, SaleId,
    SaleItem, SaleScope, SaleStatus, SaleStore, SearchQuery, StockUpdate, StoreError, UnitOfWork,
    UserId, ValidationError,
};
use tracing::{debug, error, info, instrument, warn};

use crate::cart::{Cart, CartLine, Tender};
use crate::config::EngineConfig;
use crate::receipt::{
    PaymentDisposition, PaymentOutcome, QuickSaleReceipt, Receipt, ReceiptLine, ReceiptNumber,
};

/// Records, pays and cancels sales against a [`SaleStore`].
///
/// The engine holds no state of its own beyond configuration; all
/// coordination between concurrent callers happens through the store's row
/// locks.
#[derive(Debug, Clone)]
pub struct SaleEngine<S> {
    store: S,
    config: EngineConfig,
}

impl<S> SaleEngine<S>
where
    S: SaleStore + ProductCatalog,
{
    /// Engine with the default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Engine with an explicit configuration.
    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Active configuration.
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Record a pending sale for `vendor`.
    ///
    /// Locks every referenced product, checks stock for each line, writes
    /// the sale, its items and the decremented stock, and appends a
    /// `CREATED` event, all in one unit of work.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EmptyCart`] / [`ValidationError::DuplicateProduct`]
    ///   before any storage access
    /// - [`SaleError::ProductNotFound`] for an unknown product
    /// - [`SaleError::InsufficientStock`] when a line asks for more than is
    ///   on hand
    /// - [`SaleError::Store`] on persistence failure
    #[instrument(
        name = "sale_engine.create_sale",
        skip_all,
        fields(vendor = %vendor, lines = lines.len())
    )]
    pub async fn create_sale(
        &self,
        vendor: UserId,
        lines: Vec<CartLine>,
        notes: Option<String>,
    ) -> Result<SaleDetails, SaleError> {
        let result = self.record(vendor, lines, notes).await;

        match &result {
            Ok(details) => info!(
                sale_id = %details.sale.id,
                total = %details.sale.total_amount,
                items = details.items.len(),
                "[sale_engine.create_sale] sale recorded"
            ),
            Err(error) => log_failure("create_sale", error),
        }
        result
    }

    /// Confirm payment of a sale.
    ///
    /// Safe to retry with the amount owed: a completed sale, or one already
    /// carrying this payment reference, is reported as success without
    /// recording anything. A different amount is rejected even then.
    ///
    /// # Errors
    ///
    /// - [`SaleError::SaleNotFound`] for an unknown sale
    /// - [`SaleError::SaleCancelled`] when the sale was cancelled
    /// - [`ValidationError::AmountMismatch`] when `amount` is not the total
    /// - [`SaleError::DuplicatePaymentReference`] when another sale already
    ///   holds the reference
    #[instrument(
        name = "sale_engine.mark_paid",
        skip_all,
        fields(sale_id = %sale_id, reference = %payment_reference)
    )]
    pub async fn mark_paid(
        &self,
        sale_id: SaleId,
        payment_reference: PaymentReference,
        amount: Money,
        actor: Option<UserId>,
    ) -> Result<PaymentOutcome, SaleError> {
        let result = self.pay(sale_id, payment_reference, amount, actor).await;

        match &result {
            Ok(outcome) => info!(
                sale_id = %sale_id,
                disposition = ?outcome.disposition,
                "[sale_engine.mark_paid] {}",
                outcome.disposition.detail()
            ),
            Err(error) => log_failure("mark_paid", error),
        }
        result
    }

    /// Cancel a pending sale and put its stock back.
    ///
    /// # Errors
    ///
    /// - [`SaleError::SaleNotFound`] for an unknown sale
    /// - [`SaleError::NotPending`] when the sale is completed or already
    ///   cancelled; nothing is changed
    #[instrument(
        name = "sale_engine.cancel",
        skip_all,
        fields(sale_id = %sale_id, actor = %actor)
    )]
    pub async fn cancel(
        &self,
        sale_id: SaleId,
        actor: UserId,
        reason: Option<CancellationReason>,
    ) -> Result<SaleDetails, SaleError> {
        let result = self.void(sale_id, actor, reason).await;

        match &result {
            Ok(details) => info!(
                sale_id = %sale_id,
                restored_lines = details.items.len(),
                "[sale_engine.cancel] sale cancelled and stock restored"
            ),
            Err(error) => log_failure("cancel", error),
        }
        result
    }

    /// Record a sale at the till and, when the tender covers the total,
    /// complete it in the same unit of work.
    ///
    /// The generated payment reference is `POS-{sale_id}-{METHOD}`. An
    /// under-tendered sale stays pending with zero change.
    #[instrument(
        name = "sale_engine.quick_sale",
        skip_all,
        fields(vendor = %vendor, lines = lines.len(), method = %tender.method)
    )]
    pub async fn quick_sale(
        &self,
        vendor: UserId,
        lines: Vec<CartLine>,
        tender: Tender,
    ) -> Result<QuickSaleReceipt, SaleError> {
        let result = self.checkout(vendor, lines, tender).await;

        match &result {
            Ok(receipt) => info!(
                sale_id = %receipt.details.sale.id,
                total = %receipt.details.sale.total_amount,
                status = %receipt.status(),
                change = %receipt.change,
                "[sale_engine.quick_sale] till checkout recorded"
            ),
            Err(error) => log_failure("quick_sale", error),
        }
        result
    }

    /// Receipt data for a sale recorded by `viewer`.
    ///
    /// A sale recorded by another vendor is reported as not found.
    #[instrument(
        name = "sale_engine.receipt",
        skip_all,
        fields(sale_id = %sale_id, viewer = %viewer)
    )]
    pub async fn receipt(&self, sale_id: SaleId, viewer: UserId) -> Result<Receipt, SaleError> {
        let sale = self
            .store
            .sale(sale_id)
            .await?
            .filter(|sale| sale.vendor == viewer)
            .ok_or(SaleError::SaleNotFound(sale_id))?;
        let items = self.store.sale_items(sale_id).await?;

        let product_ids: BTreeSet<ProductId> = items.iter().map(SaleItem::product_id).collect();
        let products: BTreeMap<ProductId, Product> = self
            .store
            .products(&product_ids)
            .await?
            .into_iter()
            .map(|product| (product.id, product))
            .collect();

        let mut lines = Vec::with_capacity(items.len());
        let mut subtotal = Money::zero();
        for item in &items {
            let product = products.get(&item.product_id()).ok_or_else(|| {
                StoreError::corrupted(
                    "sale item",
                    format!("product {} of sale {sale_id} is missing", item.product_id()),
                )
            })?;
            subtotal = subtotal.checked_add(item.line_total())?;
            lines.push(ReceiptLine {
                product_id: item.product_id(),
                name: product.name.clone(),
                quantity: item.quantity(),
                unit_price: item.unit_price(),
                line_total: item.line_total(),
            });
        }

        debug!(lines = lines.len(), "[sale_engine.receipt] receipt assembled");
        Ok(Receipt {
            receipt_number: ReceiptNumber::new(&self.config.receipt_prefix, sale.id),
            issued_at: sale.created_at,
            vendor: sale.vendor,
            lines,
            subtotal,
            total: sale.total_amount,
            status: sale.status,
        })
    }

    /// Available products whose name contains `query`, ordered by name and
    /// capped at the configured search limit.
    ///
    /// # Errors
    ///
    /// [`ValidationError::SearchQuery`] when `query` is blank.
    #[instrument(name = "sale_engine.search_products", skip(self))]
    pub async fn search_products(&self, query: &str) -> Result<Vec<Product>, SaleError> {
        let query = SearchQuery::try_new(query).map_err(ValidationError::from)?;
        let products = self
            .store
            .search_products(&query, self.config.search_limit.into_inner())
            .await?;
        debug!(
            matches = products.len(),
            "[sale_engine.search_products] search completed"
        );
        Ok(products)
    }

    /// A committed sale with its items.
    #[instrument(name = "sale_engine.sale_details", skip_all, fields(sale_id = %sale_id))]
    pub async fn sale_details(&self, sale_id: SaleId) -> Result<SaleDetails, SaleError> {
        let sale = self
            .store
            .sale(sale_id)
            .await?
            .ok_or(SaleError::SaleNotFound(sale_id))?;
        let items = self.store.sale_items(sale_id).await?;
        Ok(SaleDetails { sale, items })
    }

    /// The audit trail of a sale, oldest event first.
    #[instrument(name = "sale_engine.sale_events", skip_all, fields(sale_id = %sale_id))]
    pub async fn sale_events(&self, sale_id: SaleId) -> Result<Vec<SaleEvent>, SaleError> {
        if self.store.sale(sale_id).await?.is_none() {
            return Err(SaleError::SaleNotFound(sale_id));
        }
        Ok(self.store.sale_events(sale_id).await?)
    }

    /// Sales visible in `scope`, newest first.
    #[instrument(name = "sale_engine.list_sales", skip(self))]
    pub async fn list_sales(&self, scope: SaleScope) -> Result<Vec<Sale>, SaleError> {
        Ok(self.store.list_sales(scope).await?)
    }

    async fn record(
        &self,
        vendor: UserId,
        lines: Vec<CartLine>,
        notes: Option<String>,
    ) -> Result<SaleDetails, SaleError> {
        let cart = Cart::validate(lines)?;
        let mut uow = self.store.begin().await?;
        let result = record_sale(&mut uow, vendor, &cart, notes).await;
        settle(uow, result).await
    }

    async fn pay(
        &self,
        sale_id: SaleId,
        payment_reference: PaymentReference,
        amount: Money,
        actor: Option<UserId>,
    ) -> Result<PaymentOutcome, SaleError> {
        let mut uow = self.store.begin().await?;
        match confirm_payment(&mut uow, sale_id, payment_reference, amount, actor).await {
            Ok(outcome) if !outcome.disposition.recorded_payment() => {
                release(uow).await;
                Ok(outcome)
            }
            result => settle(uow, result).await,
        }
    }

    async fn void(
        &self,
        sale_id: SaleId,
        actor: UserId,
        reason: Option<CancellationReason>,
    ) -> Result<SaleDetails, SaleError> {
        let mut uow = self.store.begin().await?;
        let result = cancel_sale(&mut uow, sale_id, actor, reason).await;
        settle(uow, result).await
    }

    async fn checkout(
        &self,
        vendor: UserId,
        lines: Vec<CartLine>,
        tender: Tender,
    ) -> Result<QuickSaleReceipt, SaleError> {
        let cart = Cart::validate(lines)?;
        let mut uow = self.store.begin().await?;
        let result = self.complete_at_till(&mut uow, vendor, &cart, tender).await;
        settle(uow, result).await
    }

    async fn complete_at_till<U: UnitOfWork>(
        &self,
        uow: &mut U,
        vendor: UserId,
        cart: &Cart,
        tender: Tender,
    ) -> Result<QuickSaleReceipt, SaleError> {
        let details = record_sale(uow, vendor, cart, None).await?;
        let sale_id = details.sale.id;
        let receipt_number = ReceiptNumber::new(&self.config.receipt_prefix, sale_id);

        let Some(change) = tender.change_for(details.sale.total_amount) else {
            debug!(
                sale_id = %sale_id,
                tendered = %tender.amount,
                "[sale_engine.quick_sale] tender short of total, sale left pending"
            );
            return Ok(QuickSaleReceipt {
                details,
                payment_received: tender.amount,
                change: Money::zero(),
                receipt_number,
            });
        };

        let reference = PaymentReference::try_new(format!(
            "{}-{sale_id}-{}",
            self.config.pos_reference_prefix, tender.method
        ))
        .map_err(ValidationError::from)?;
        let sale = uow
            .update_sale_status(sale_id, SaleStatus::Completed, Some(reference.clone()))
            .await
            .map_err(|error| payment_conflict(error, &reference))?;
        let event = uow
            .append_event(NewSaleEvent {
                sale_id,
                actor: Some(vendor),
                payload: SaleEventPayload::MarkedPaid {
                    payment_reference: reference,
                    payment_method: Some(tender.method),
                    amount_paid: Some(tender.amount),
                    change: Some(change),
                },
            })
            .await?;
        debug!(
            sale_id = %sale_id,
            event_id = %event.id,
            "[sale_engine.quick_sale] MARKED_PAID event appended"
        );

        Ok(QuickSaleReceipt {
            details: SaleDetails {
                sale,
                items: details.items,
            },
            payment_received: tender.amount,
            change,
            receipt_number,
        })
    }
}

async fn record_sale<U: UnitOfWork>(
    uow: &mut U,
    vendor: UserId,
    cart: &Cart,
    notes: Option<String>,
) -> Result<SaleDetails, SaleError> {
    let locked = uow.lock_and_fetch(cart.product_ids()).await?;

    let mut priced = Vec::with_capacity(cart.lines().len());
    for line in cart.lines() {
        let product = locked
            .get(&line.product_id)
            .ok_or(SaleError::ProductNotFound(line.product_id))?;
        if product.stock < line.quantity.into_inner() {
            return Err(SaleError::InsufficientStock {
                product_id: product.id,
                requested: line.quantity,
                available: product.stock,
            });
        }
        priced.push((line, product));
    }

    let sale = uow.create_sale(vendor, notes).await?;

    let mut total = Money::zero();
    let mut items = Vec::with_capacity(priced.len());
    let mut stock_updates = Vec::with_capacity(priced.len());
    for (line, product) in priced {
        let unit_price = line.unit_price.unwrap_or(product.price);
        let item = SaleItem::new(sale.id, product.id, line.quantity, unit_price)?;
        total = total.checked_add(item.line_total())?;
        stock_updates.push(StockUpdate {
            product_id: product.id,
            stock: product.stock - line.quantity.into_inner(),
        });
        items.push(item);
    }

    uow.batch_create_items(&items).await?;
    uow.batch_update_stock(&stock_updates).await?;
    let sale = uow.update_sale_total(sale.id, total).await?;
    let event = uow
        .append_event(NewSaleEvent {
            sale_id: sale.id,
            actor: Some(vendor),
            payload: SaleEventPayload::Created { total },
        })
        .await?;
    debug!(
        sale_id = %sale.id,
        event_id = %event.id,
        "[sale_engine] CREATED event appended"
    );

    Ok(SaleDetails { sale, items })
}

async fn confirm_payment<U: UnitOfWork>(
    uow: &mut U,
    sale_id: SaleId,
    reference: PaymentReference,
    amount: Money,
    actor: Option<UserId>,
) -> Result<PaymentOutcome, SaleError> {
    let sale = uow
        .lock_sale(sale_id)
        .await?
        .ok_or(SaleError::SaleNotFound(sale_id))?;

    if sale.status == SaleStatus::Cancelled {
        return Err(SaleError::SaleCancelled(sale_id));
    }
    // Retries are only idempotent for the amount actually owed.
    if amount != sale.total_amount {
        return Err(ValidationError::AmountMismatch {
            expected: sale.total_amount,
            provided: amount,
        }
        .into());
    }
    if sale.status == SaleStatus::Completed {
        return Ok(PaymentOutcome {
            sale,
            disposition: PaymentDisposition::AlreadyCompleted,
        });
    }
    if sale.payment_reference.as_ref() == Some(&reference) {
        return Ok(PaymentOutcome {
            sale,
            disposition: PaymentDisposition::AlreadyRecorded,
        });
    }

    let sale = uow
        .update_sale_status(sale_id, SaleStatus::Completed, Some(reference.clone()))
        .await
        .map_err(|error| payment_conflict(error, &reference))?;
    let event = uow
        .append_event(NewSaleEvent {
            sale_id,
            actor,
            payload: SaleEventPayload::marked_paid(reference),
        })
        .await?;
    debug!(
        sale_id = %sale_id,
        event_id = %event.id,
        "[sale_engine.mark_paid] MARKED_PAID event appended"
    );

    Ok(PaymentOutcome {
        sale,
        disposition: PaymentDisposition::Completed,
    })
}

async fn cancel_sale<U: UnitOfWork>(
    uow: &mut U,
    sale_id: SaleId,
    actor: UserId,
    reason: Option<CancellationReason>,
) -> Result<SaleDetails, SaleError> {
    let sale = uow
        .lock_sale(sale_id)
        .await?
        .ok_or(SaleError::SaleNotFound(sale_id))?;
    if sale.status != SaleStatus::Pending {
        return Err(SaleError::NotPending {
            sale_id,
            status: sale.status,
        });
    }

    let items = uow.sale_items(sale_id).await?;
    let product_ids: BTreeSet<ProductId> = items.iter().map(SaleItem::product_id).collect();
    let locked = uow.lock_and_fetch(&product_ids).await?;

    let mut stock_updates = Vec::with_capacity(items.len());
    for item in &items {
        let product = locked.get(&item.product_id()).ok_or_else(|| {
            StoreError::corrupted(
                "sale item",
                format!("product {} of sale {sale_id} is missing", item.product_id()),
            )
        })?;
        let stock = product
            .stock
            .checked_add(item.quantity().into_inner())
            .ok_or_else(|| {
                StoreError::corrupted("product", format!("stock of {} overflows", product.id))
            })?;
        stock_updates.push(StockUpdate {
            product_id: product.id,
            stock,
        });
    }

    uow.batch_update_stock(&stock_updates).await?;
    let sale = uow
        .update_sale_status(sale_id, SaleStatus::Cancelled, None)
        .await?;
    let event = uow
        .append_event(NewSaleEvent {
            sale_id,
            actor: Some(actor),
            payload: SaleEventPayload::Cancelled { reason },
        })
        .await?;
    debug!(
        sale_id = %sale_id,
        event_id = %event.id,
        "[sale_engine.cancel] CANCELLED event appended"
    );

    Ok(SaleDetails { sale, items })
}

fn payment_conflict(error: StoreError, reference: &PaymentReference) -> SaleError {
    match error {
        StoreError::UniqueViolation {
            constraint: Constraint::PaymentReference,
            ..
        } => SaleError::DuplicatePaymentReference(reference.clone()),
        other => SaleError::Store(other),
    }
}

/// Commit on success; on failure roll back and hand the original error on.
async fn settle<U, T>(uow: U, result: Result<T, SaleError>) -> Result<T, SaleError>
where
    U: UnitOfWork,
{
    match result {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(error) => {
            release(uow).await;
            Err(error)
        }
    }
}

async fn release<U: UnitOfWork>(uow: U) {
    if let Err(rollback_error) = uow.rollback().await {
        warn!(
            error = %rollback_error,
            "[sale_engine.rollback] rollback failed, unit of work dropped"
        );
    }
}

fn log_failure(operation: &'static str, failure: &SaleError) {
    match failure.kind() {
        ErrorKind::Storage => error!(
            operation,
            error = %failure,
            "[sale_engine] storage failure, unit of work rolled back"
        ),
        kind => warn!(
            operation,
            ?kind,
            error = %failure,
            "[sale_engine] operation rejected"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tillcore_memory::InMemorySaleStore;
    use tillcore_types::{ProductName, Quantity};
    use tracing_test::traced_test;

    fn widget(stock: u32) -> Product {
        Product::new(
            ProductId::generate(),
            ProductName::try_new("Widget").unwrap(),
            Money::new(dec!(5.00)).unwrap(),
            stock,
        )
    }

    fn vendor() -> UserId {
        UserId::try_new(7).unwrap()
    }

    fn units(product: &Product, count: u32) -> Vec<CartLine> {
        vec![CartLine::new(product.id, Quantity::try_new(count).unwrap())]
    }

    #[tokio::test]
    #[traced_test]
    async fn recorded_sale_is_logged_with_its_total() {
        let product = widget(10);
        let engine = SaleEngine::new(InMemorySaleStore::with_products([product.clone()]));

        let _ = engine
            .create_sale(vendor(), units(&product, 3), None)
            .await
            .unwrap();

        assert!(logs_contain("[sale_engine.create_sale] sale recorded"));
        assert!(logs_contain("total=15.00"));
    }

    #[tokio::test]
    #[traced_test]
    async fn appended_events_are_logged_with_their_ids() {
        let product = widget(10);
        let engine = SaleEngine::new(InMemorySaleStore::with_products([product.clone()]));
        let sale = engine
            .create_sale(vendor(), units(&product, 1), None)
            .await
            .unwrap()
            .sale;

        let _ = engine.cancel(sale.id, vendor(), None).await.unwrap();

        let events = engine.sale_events(sale.id).await.unwrap();
        assert!(logs_contain("[sale_engine] CREATED event appended"));
        assert!(logs_contain("[sale_engine.cancel] CANCELLED event appended"));
        for event in &events {
            assert!(logs_contain(&format!("event_id={}", event.id)));
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn rejected_sale_is_logged_as_a_warning() {
        let product = widget(1);
        let engine = SaleEngine::new(InMemorySaleStore::with_products([product.clone()]));

        let result = engine.create_sale(vendor(), units(&product, 2), None).await;

        assert!(matches!(result, Err(SaleError::InsufficientStock { .. })));
        assert!(logs_contain("[sale_engine] operation rejected"));
        assert!(logs_contain("Conflict"));
        assert!(!logs_contain("sale recorded"));
    }

    #[tokio::test]
    #[traced_test]
    async fn idempotent_payment_logs_its_disposition() {
        let product = widget(10);
        let engine = SaleEngine::new(InMemorySaleStore::with_products([product.clone()]));
        let sale = engine
            .create_sale(vendor(), units(&product, 1), None)
            .await
            .unwrap()
            .sale;
        let reference = PaymentReference::try_new("PAY-LOG").unwrap();

        for _ in 0..2 {
            let _ = engine
                .mark_paid(sale.id, reference.clone(), sale.total_amount, None)
                .await
                .unwrap();
        }

        assert!(logs_contain("Sale is marked as completed."));
        assert!(logs_contain("Sale already completed."));
    }

    #[tokio::test]
    async fn under_tendered_checkout_stays_pending() {
        let product = widget(10);
        let engine = SaleEngine::new(InMemorySaleStore::with_products([product.clone()]));

        let receipt = engine
            .quick_sale(
                vendor(),
                units(&product, 2),
                Tender::cash(Money::new(dec!(9.99)).unwrap()),
            )
            .await
            .unwrap();

        assert_eq!(receipt.status(), SaleStatus::Pending);
        assert_eq!(receipt.change, Money::zero());
        assert_eq!(receipt.payment_received, Money::new(dec!(9.99)).unwrap());
        assert_eq!(receipt.details.sale.payment_reference, None);
        let events = engine.sale_events(receipt.details.sale.id).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn receipt_for_another_vendors_sale_is_not_found() {
        let product = widget(10);
        let engine = SaleEngine::new(InMemorySaleStore::with_products([product.clone()]));
        let sale = engine
            .create_sale(vendor(), units(&product, 1), None)
            .await
            .unwrap()
            .sale;

        let result = engine.receipt(sale.id, UserId::try_new(8).unwrap()).await;

        assert!(matches!(result, Err(SaleError::SaleNotFound(id)) if id == sale.id));
    }

    #[test]
    fn foreign_unique_violations_stay_storage_errors() {
        let reference = PaymentReference::try_new("PAY-1").unwrap();
        let error = StoreError::UniqueViolation {
            operation: tillcore_types::Operation::CreateItems,
            constraint: Constraint::SaleProduct,
        };

        let mapped = payment_conflict(error, &reference);

        assert_eq!(mapped.kind(), ErrorKind::Storage);
    }
}
