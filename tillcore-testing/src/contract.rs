use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tillcore::{
    Constraint, ErrorKind, InventoryTransaction, LedgerTransaction, NewSaleEvent, Operation,
    PaymentDisposition, PaymentReference, Product, ProductCatalog, ProductId, SaleEngine,
    SaleError, SaleEventPayload, SaleEventType, SaleItem, SaleScope, SaleStatus, SaleStore,
    StockUpdate, StoreError, Tender, UnitOfWork,
};

use crate::chaos::{ChaosConfig, ChaosSaleStoreExt};
use crate::fixtures::{line, money, product, quantity, unique_user};

#[derive(Debug)]
pub struct ContractTestFailure {
    scenario: &'static str,
    detail: String,
}

impl ContractTestFailure {
    fn new(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self {
            scenario,
            detail: detail.into(),
        }
    }

    fn store_error(scenario: &'static str, operation: &'static str, error: StoreError) -> Self {
        Self::new(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }

    fn engine_error(scenario: &'static str, operation: &'static str, error: SaleError) -> Self {
        Self::new(
            scenario,
            format!("engine {operation} returned unexpected error: {error}"),
        )
    }

    fn assertion(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self::new(scenario, detail)
    }
}

impl fmt::Display for ContractTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.detail)
    }
}

impl std::error::Error for ContractTestFailure {}

pub type ContractTestResult = Result<(), ContractTestFailure>;

fn store_step<T>(
    scenario: &'static str,
    operation: &'static str,
    result: Result<T, StoreError>,
) -> Result<T, ContractTestFailure> {
    result.map_err(|error| ContractTestFailure::store_error(scenario, operation, error))
}

fn engine_step<T>(
    scenario: &'static str,
    operation: &'static str,
    result: Result<T, SaleError>,
) -> Result<T, ContractTestFailure> {
    result.map_err(|error| ContractTestFailure::engine_error(scenario, operation, error))
}

fn ensure(scenario: &'static str, condition: bool, detail: impl FnOnce() -> String) -> ContractTestResult {
    if condition {
        Ok(())
    } else {
        Err(ContractTestFailure::assertion(scenario, detail()))
    }
}

async fn seed<S: ProductCatalog>(
    scenario: &'static str,
    store: &S,
    product: Product,
) -> Result<Product, ContractTestFailure> {
    store_step(scenario, "put_product", store.put_product(product.clone()).await)?;
    Ok(product)
}

async fn stock_of<S: ProductCatalog>(
    scenario: &'static str,
    store: &S,
    product_id: ProductId,
) -> Result<u32, ContractTestFailure> {
    store_step(scenario, "product", store.product(product_id).await)?
        .map(|product| product.stock)
        .ok_or_else(|| {
            ContractTestFailure::assertion(scenario, format!("product {product_id} vanished"))
        })
}

fn unique_reference(label: &str) -> PaymentReference {
    PaymentReference::try_new(format!("contract-{label}-{}", ProductId::generate()))
        .expect("generated payment reference should be valid")
}

pub async fn test_lock_and_fetch_skips_unknown_products<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: SaleStore + ProductCatalog + 'static,
{
    const SCENARIO: &str = "lock_and_fetch_skips_unknown_products";

    let store = make_store();
    let widget = seed(SCENARIO, &store, product("Contract Widget", "5.00", 10)).await?;
    let unknown = ProductId::generate();

    let mut uow = store_step(SCENARIO, "begin", store.begin().await)?;
    let locked = store_step(
        SCENARIO,
        "lock_and_fetch",
        uow.lock_and_fetch(&BTreeSet::from([widget.id, unknown]))
            .await,
    )?;
    store_step(SCENARIO, "rollback", uow.rollback().await)?;

    ensure(SCENARIO, locked.len() == 1, || {
        format!("expected exactly the known product, observed {} rows", locked.len())
    })?;
    ensure(SCENARIO, locked.get(&widget.id) == Some(&widget), || {
        format!("locked row does not match the seeded product: {locked:?}")
    })
}

pub async fn test_commit_publishes_staged_writes<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: SaleStore + ProductCatalog + 'static,
{
    const SCENARIO: &str = "commit_publishes_staged_writes";

    let store = make_store();
    let vendor = unique_user();
    let widget = seed(SCENARIO, &store, product("Contract Widget", "5.00", 10)).await?;

    let mut uow = store_step(SCENARIO, "begin", store.begin().await)?;
    let _ = store_step(
        SCENARIO,
        "lock_and_fetch",
        uow.lock_and_fetch(&BTreeSet::from([widget.id])).await,
    )?;
    let sale = store_step(SCENARIO, "create_sale", uow.create_sale(vendor, None).await)?;
    let item = SaleItem::new(sale.id, widget.id, quantity(3), widget.price)
        .map_err(|error| ContractTestFailure::assertion(SCENARIO, error.to_string()))?;
    store_step(
        SCENARIO,
        "batch_create_items",
        uow.batch_create_items(&[item.clone()]).await,
    )?;
    store_step(
        SCENARIO,
        "batch_update_stock",
        uow.batch_update_stock(&[StockUpdate {
            product_id: widget.id,
            stock: 7,
        }])
        .await,
    )?;
    let _ = store_step(
        SCENARIO,
        "update_sale_total",
        uow.update_sale_total(sale.id, item.line_total()).await,
    )?;
    let _ = store_step(
        SCENARIO,
        "append_event",
        uow.append_event(NewSaleEvent {
            sale_id: sale.id,
            actor: Some(vendor),
            payload: SaleEventPayload::Created {
                total: item.line_total(),
            },
        })
        .await,
    )?;
    store_step(SCENARIO, "commit", uow.commit().await)?;

    let stored = store_step(SCENARIO, "sale", store.sale(sale.id).await)?.ok_or_else(|| {
        ContractTestFailure::assertion(SCENARIO, "committed sale is not readable")
    })?;
    ensure(
        SCENARIO,
        stored.status == SaleStatus::Pending && stored.total_amount == money("15.00"),
        || format!("unexpected committed sale: {stored:?}"),
    )?;
    let items = store_step(SCENARIO, "sale_items", store.sale_items(sale.id).await)?;
    ensure(SCENARIO, items == vec![item], || {
        format!("unexpected committed items: {items:?}")
    })?;
    let stock = stock_of(SCENARIO, &store, widget.id).await?;
    ensure(SCENARIO, stock == 7, || {
        format!("expected stock 7 after commit, observed {stock}")
    })?;
    let events = store_step(SCENARIO, "sale_events", store.sale_events(sale.id).await)?;
    ensure(
        SCENARIO,
        events.len() == 1 && events[0].event_type() == SaleEventType::Created,
        || format!("expected one CREATED event, observed {events:?}"),
    )
}

pub async fn test_rollback_discards_staged_writes<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: SaleStore + ProductCatalog + 'static,
{
    const SCENARIO: &str = "rollback_discards_staged_writes";

    let store = make_store();
    let vendor = unique_user();
    let widget = seed(SCENARIO, &store, product("Contract Widget", "5.00", 10)).await?;

    let mut sale_ids = Vec::new();
    for explicit_rollback in [true, false] {
        let mut uow = store_step(SCENARIO, "begin", store.begin().await)?;
        let _ = store_step(
            SCENARIO,
            "lock_and_fetch",
            uow.lock_and_fetch(&BTreeSet::from([widget.id])).await,
        )?;
        let sale = store_step(SCENARIO, "create_sale", uow.create_sale(vendor, None).await)?;
        store_step(
            SCENARIO,
            "batch_update_stock",
            uow.batch_update_stock(&[StockUpdate {
                product_id: widget.id,
                stock: 0,
            }])
            .await,
        )?;
        let _ = store_step(
            SCENARIO,
            "append_event",
            uow.append_event(NewSaleEvent {
                sale_id: sale.id,
                actor: None,
                payload: SaleEventPayload::Cancelled { reason: None },
            })
            .await,
        )?;
        if explicit_rollback {
            store_step(SCENARIO, "rollback", uow.rollback().await)?;
        } else {
            drop(uow);
        }
        sale_ids.push(sale.id);
    }

    for sale_id in sale_ids {
        let sale = store_step(SCENARIO, "sale", store.sale(sale_id).await)?;
        ensure(SCENARIO, sale.is_none(), || {
            format!("rolled back sale {sale_id} is visible")
        })?;
        let events = store_step(SCENARIO, "sale_events", store.sale_events(sale_id).await)?;
        ensure(SCENARIO, events.is_empty(), || {
            format!("rolled back events are visible: {events:?}")
        })?;
    }
    let stock = stock_of(SCENARIO, &store, widget.id).await?;
    ensure(SCENARIO, stock == 10, || {
        format!("expected untouched stock 10, observed {stock}")
    })
}

pub async fn test_row_lock_blocks_second_unit_of_work<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: SaleStore + ProductCatalog + 'static,
{
    const SCENARIO: &str = "row_lock_blocks_second_unit_of_work";

    let store = Arc::new(make_store());
    let widget = seed(SCENARIO, store.as_ref(), product("Contract Widget", "5.00", 10)).await?;
    let ids = BTreeSet::from([widget.id]);

    let mut first = store_step(SCENARIO, "begin", store.begin().await)?;
    let _ = store_step(SCENARIO, "lock_and_fetch", first.lock_and_fetch(&ids).await)?;

    let contender = {
        let store = Arc::clone(&store);
        let ids = ids.clone();
        tokio::spawn(async move {
            let mut second = store.begin().await?;
            let locked = second.lock_and_fetch(&ids).await?;
            second.rollback().await?;
            Ok::<_, StoreError>(locked.into_values().next().map(|product| product.stock))
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    ensure(SCENARIO, !contender.is_finished(), || {
        "second unit of work acquired a row lock held by the first".to_string()
    })?;

    store_step(
        SCENARIO,
        "batch_update_stock",
        first
            .batch_update_stock(&[StockUpdate {
                product_id: widget.id,
                stock: 4,
            }])
            .await,
    )?;
    store_step(SCENARIO, "commit", first.commit().await)?;

    let observed = contender
        .await
        .map_err(|error| ContractTestFailure::assertion(SCENARIO, error.to_string()))?;
    let observed = store_step(SCENARIO, "lock_and_fetch", observed)?;
    ensure(SCENARIO, observed == Some(4), || {
        format!("blocked unit of work should read the committed stock 4, observed {observed:?}")
    })
}

pub async fn test_payment_reference_is_unique<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: SaleStore + ProductCatalog + 'static,
{
    const SCENARIO: &str = "payment_reference_is_unique";

    let store = make_store();
    let vendor = unique_user();
    let reference = unique_reference("unique");

    let mut uow = store_step(SCENARIO, "begin", store.begin().await)?;
    let first = store_step(SCENARIO, "create_sale", uow.create_sale(vendor, None).await)?;
    let _ = store_step(
        SCENARIO,
        "update_sale_status",
        uow.update_sale_status(first.id, SaleStatus::Completed, Some(reference.clone()))
            .await,
    )?;
    store_step(SCENARIO, "commit", uow.commit().await)?;

    let mut uow = store_step(SCENARIO, "begin", store.begin().await)?;
    let second = store_step(SCENARIO, "create_sale", uow.create_sale(vendor, None).await)?;
    match uow
        .update_sale_status(second.id, SaleStatus::Completed, Some(reference))
        .await
    {
        Err(StoreError::UniqueViolation {
            constraint: Constraint::PaymentReference,
            ..
        }) => Ok(()),
        Err(error) => Err(ContractTestFailure::store_error(
            SCENARIO,
            "update_sale_status",
            error,
        )),
        Ok(sale) => Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected a unique violation but sale {} took the reference", sale.id),
        )),
    }
}

pub async fn test_concurrent_checkouts_never_oversell<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: SaleStore + ProductCatalog + 'static,
{
    const SCENARIO: &str = "concurrent_checkouts_never_oversell";

    let engine = Arc::new(SaleEngine::new(make_store()));
    let last_unit = seed(SCENARIO, engine.store(), product("Contract Last Unit", "9.99", 1)).await?;

    let checkouts: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let cart = vec![line(&last_unit, 1)];
            tokio::spawn(async move { engine.create_sale(unique_user(), cart, None).await })
        })
        .collect();

    let mut successes = 0;
    let mut shortfalls = 0;
    for checkout in checkouts {
        match checkout
            .await
            .map_err(|error| ContractTestFailure::assertion(SCENARIO, error.to_string()))?
        {
            Ok(_) => successes += 1,
            Err(SaleError::InsufficientStock { available: 0, .. }) => shortfalls += 1,
            Err(error) => {
                return Err(ContractTestFailure::engine_error(SCENARIO, "create_sale", error))
            }
        }
    }

    ensure(SCENARIO, successes == 1 && shortfalls == 1, || {
        format!("expected one winner and one shortfall, observed {successes} and {shortfalls}")
    })?;
    let stock = stock_of(SCENARIO, engine.store(), last_unit.id).await?;
    ensure(SCENARIO, stock == 0, || {
        format!("expected stock 0, observed {stock}")
    })
}

pub async fn test_sale_lifecycle<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: SaleStore + ProductCatalog + 'static,
{
    const SCENARIO: &str = "sale_lifecycle";

    let engine = SaleEngine::new(make_store());
    let vendor = unique_user();
    let widget = seed(SCENARIO, engine.store(), product("Contract Widget", "5.00", 10)).await?;

    let created = engine_step(
        SCENARIO,
        "create_sale",
        engine
            .create_sale(vendor, vec![line(&widget, 3)], Some("table 4".to_string()))
            .await,
    )?;
    let sale_id = created.sale.id;
    ensure(SCENARIO, created.sale.total_amount == money("15.00"), || {
        format!("expected total 15.00, observed {}", created.sale.total_amount)
    })?;
    let stock = stock_of(SCENARIO, engine.store(), widget.id).await?;
    ensure(SCENARIO, stock == 7, || {
        format!("expected stock 7 after sale, observed {stock}")
    })?;

    let cancelled = engine_step(
        SCENARIO,
        "cancel",
        engine.cancel(sale_id, vendor, None).await,
    )?;
    ensure(SCENARIO, cancelled.sale.status == SaleStatus::Cancelled, || {
        format!("expected CANCELLED, observed {}", cancelled.sale.status)
    })?;
    let stock = stock_of(SCENARIO, engine.store(), widget.id).await?;
    ensure(SCENARIO, stock == 10, || {
        format!("expected stock restored to 10, observed {stock}")
    })?;

    match engine
        .mark_paid(sale_id, unique_reference("cancelled"), money("15.00"), None)
        .await
    {
        Err(SaleError::SaleCancelled(id)) if id == sale_id => {}
        other => {
            return Err(ContractTestFailure::assertion(
                SCENARIO,
                format!("paying a cancelled sale should be rejected, observed {other:?}"),
            ))
        }
    }
    match engine.cancel(sale_id, vendor, None).await {
        Err(SaleError::NotPending {
            status: SaleStatus::Cancelled,
            ..
        }) => {}
        other => {
            return Err(ContractTestFailure::assertion(
                SCENARIO,
                format!("second cancel should be rejected, observed {other:?}"),
            ))
        }
    }

    let events = engine_step(SCENARIO, "sale_events", engine.sale_events(sale_id).await)?;
    let types: Vec<_> = events.iter().map(|event| event.event_type()).collect();
    ensure(
        SCENARIO,
        types == [SaleEventType::Created, SaleEventType::Cancelled],
        || format!("expected CREATED then CANCELLED, observed {types:?}"),
    )
}

pub async fn test_mark_paid_is_idempotent<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: SaleStore + ProductCatalog + 'static,
{
    const SCENARIO: &str = "mark_paid_is_idempotent";

    let engine = SaleEngine::new(make_store());
    let vendor = unique_user();
    let widget = seed(SCENARIO, engine.store(), product("Contract Widget", "5.00", 10)).await?;
    let created = engine_step(
        SCENARIO,
        "create_sale",
        engine.create_sale(vendor, vec![line(&widget, 3)], None).await,
    )?;
    let sale_id = created.sale.id;
    let reference = unique_reference("idempotent");

    let mut dispositions = Vec::new();
    for _ in 0..2 {
        let outcome = engine_step(
            SCENARIO,
            "mark_paid",
            engine
                .mark_paid(sale_id, reference.clone(), money("15.00"), Some(vendor))
                .await,
        )?;
        dispositions.push(outcome.disposition);
    }
    ensure(
        SCENARIO,
        dispositions == [PaymentDisposition::Completed, PaymentDisposition::AlreadyCompleted],
        || format!("unexpected dispositions {dispositions:?}"),
    )?;

    let details = engine_step(SCENARIO, "sale_details", engine.sale_details(sale_id).await)?;
    ensure(
        SCENARIO,
        details.sale.status == SaleStatus::Completed
            && details.sale.payment_reference.as_ref() == Some(&reference),
        || format!("unexpected paid sale {:?}", details.sale),
    )?;

    let events = engine_step(SCENARIO, "sale_events", engine.sale_events(sale_id).await)?;
    let paid_events = events
        .iter()
        .filter(|event| event.event_type() == SaleEventType::MarkedPaid)
        .count();
    ensure(SCENARIO, paid_events == 1, || {
        format!("expected exactly one MARKED_PAID event, observed {paid_events}")
    })?;

    match engine.cancel(sale_id, vendor, None).await {
        Err(SaleError::NotPending {
            status: SaleStatus::Completed,
            ..
        }) => {}
        other => {
            return Err(ContractTestFailure::assertion(
                SCENARIO,
                format!("cancelling a completed sale should be rejected, observed {other:?}"),
            ))
        }
    }
    let stock = stock_of(SCENARIO, engine.store(), widget.id).await?;
    ensure(SCENARIO, stock == 7, || {
        format!("rejected cancel must not restore stock, observed {stock}")
    })
}

pub async fn test_rejected_sale_leaves_no_trace<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: SaleStore + ProductCatalog + 'static,
{
    const SCENARIO: &str = "rejected_sale_leaves_no_trace";

    let engine = SaleEngine::new(make_store());
    let vendor = unique_user();
    let plenty = seed(SCENARIO, engine.store(), product("Contract Plenty", "1.00", 5)).await?;
    let scarce = seed(SCENARIO, engine.store(), product("Contract Scarce", "2.00", 1)).await?;

    match engine
        .create_sale(vendor, vec![line(&plenty, 2), line(&scarce, 2)], None)
        .await
    {
        Err(SaleError::InsufficientStock {
            product_id,
            available: 1,
            ..
        }) if product_id == scarce.id => {}
        other => {
            return Err(ContractTestFailure::assertion(
                SCENARIO,
                format!("expected insufficient stock for the scarce product, observed {other:?}"),
            ))
        }
    }

    let plenty_stock = stock_of(SCENARIO, engine.store(), plenty.id).await?;
    let scarce_stock = stock_of(SCENARIO, engine.store(), scarce.id).await?;
    ensure(SCENARIO, plenty_stock == 5 && scarce_stock == 1, || {
        format!("stock changed by a rejected sale: {plenty_stock} / {scarce_stock}")
    })?;
    let sales = engine_step(
        SCENARIO,
        "list_sales",
        engine.list_sales(SaleScope::Vendor(vendor)).await,
    )?;
    ensure(SCENARIO, sales.is_empty(), || {
        format!("rejected sale was recorded: {sales:?}")
    })
}

pub async fn test_injected_failures_roll_back<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: SaleStore + ProductCatalog + 'static,
{
    const SCENARIO: &str = "injected_failures_roll_back";

    let steps = [
        Operation::LockProducts,
        Operation::CreateSale,
        Operation::CreateItems,
        Operation::UpdateStock,
        Operation::UpdateSaleTotal,
        Operation::AppendEvent,
        Operation::CommitTransaction,
    ];

    for operation in steps {
        let store = make_store();
        let vendor = unique_user();
        let widget = seed(SCENARIO, &store, product("Contract Widget", "5.00", 10)).await?;
        let engine = SaleEngine::new(
            store.with_chaos(ChaosConfig::deterministic().failing_on(operation)),
        );

        match engine.create_sale(vendor, vec![line(&widget, 3)], None).await {
            Err(error) if error.kind() == ErrorKind::Storage => {}
            other => {
                return Err(ContractTestFailure::assertion(
                    SCENARIO,
                    format!("failure at {operation} should surface as storage error, observed {other:?}"),
                ))
            }
        }

        let inner = engine.store().inner();
        let stock = stock_of(SCENARIO, inner, widget.id).await?;
        ensure(SCENARIO, stock == 10, || {
            format!("failure at {operation} leaked a stock change: {stock}")
        })?;
        let sales = store_step(
            SCENARIO,
            "list_sales",
            inner.list_sales(SaleScope::Vendor(vendor)).await,
        )?;
        ensure(SCENARIO, sales.is_empty(), || {
            format!("failure at {operation} leaked a sale: {sales:?}")
        })?;
    }
    Ok(())
}

pub async fn test_list_sales_newest_first<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: SaleStore + ProductCatalog + 'static,
{
    const SCENARIO: &str = "list_sales_newest_first";

    let engine = SaleEngine::new(make_store());
    let vendor = unique_user();
    let other_vendor = unique_user();
    let widget = seed(SCENARIO, engine.store(), product("Contract Widget", "1.00", 10)).await?;

    let mut recorded = Vec::new();
    for seller in [vendor, other_vendor, vendor] {
        let details = engine_step(
            SCENARIO,
            "create_sale",
            engine.create_sale(seller, vec![line(&widget, 1)], None).await,
        )?;
        recorded.push(details.sale.id);
    }

    let own = engine_step(
        SCENARIO,
        "list_sales",
        engine.list_sales(SaleScope::Vendor(vendor)).await,
    )?;
    let own_ids: Vec<_> = own.iter().map(|sale| sale.id).collect();
    ensure(SCENARIO, own_ids == [recorded[2], recorded[0]], || {
        format!("vendor scope should list its own sales newest first, observed {own_ids:?}")
    })?;

    let all = engine_step(SCENARIO, "list_sales", engine.list_sales(SaleScope::All).await)?;
    let ours: Vec<_> = all
        .iter()
        .map(|sale| sale.id)
        .filter(|id| recorded.contains(id))
        .collect();
    ensure(
        SCENARIO,
        ours == [recorded[2], recorded[1], recorded[0]],
        || format!("staff scope should list every sale newest first, observed {ours:?}"),
    )
}

pub async fn test_search_products<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: SaleStore + ProductCatalog + 'static,
{
    const SCENARIO: &str = "search_products";

    let engine = SaleEngine::new(make_store());
    let token = format!("zq{}", rand::random::<u32>());
    let black = seed(
        SCENARIO,
        engine.store(),
        product(&format!("{token} Black Tea"), "2.50", 5),
    )
    .await?;
    let green = seed(
        SCENARIO,
        engine.store(),
        product(&format!("{token} green tea"), "2.50", 5),
    )
    .await?;
    let _ = seed(
        SCENARIO,
        engine.store(),
        product(&format!("{token} Teapot"), "15.00", 1).unavailable(),
    )
    .await?;

    let found = engine_step(
        SCENARIO,
        "search_products",
        engine.search_products(&token.to_uppercase()).await,
    )?;
    let ids: Vec<_> = found.iter().map(|product| product.id).collect();
    ensure(SCENARIO, ids == [black.id, green.id], || {
        format!("expected the two available teas ordered by name, observed {found:?}")
    })?;

    match engine.search_products("   ").await {
        Err(error) if error.kind() == ErrorKind::Validation => Ok(()),
        other => Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("blank search should be rejected, observed {other:?}"),
        )),
    }
}

pub async fn test_quick_sale<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: SaleStore + ProductCatalog + 'static,
{
    const SCENARIO: &str = "quick_sale";

    let engine = SaleEngine::new(make_store());
    let vendor = unique_user();
    let snack = seed(SCENARIO, engine.store(), product("Contract Snack", "2.50", 10)).await?;

    let paid = engine_step(
        SCENARIO,
        "quick_sale",
        engine
            .quick_sale(vendor, vec![line(&snack, 2)], Tender::cash(money("10.00")))
            .await,
    )?;
    let sale = &paid.details.sale;
    let expected_reference = format!("POS-{}-CASH", sale.id);
    ensure(
        SCENARIO,
        sale.status == SaleStatus::Completed
            && paid.change == money("5.00")
            && sale.payment_reference.as_deref() == Some(&expected_reference),
        || format!("unexpected till checkout {paid:?}"),
    )?;
    let events = engine_step(SCENARIO, "sale_events", engine.sale_events(sale.id).await)?;
    match events.as_slice() {
        [created, paid_event] if created.event_type() == SaleEventType::Created => {
            match &paid_event.payload {
                SaleEventPayload::MarkedPaid {
                    payment_method: Some(method),
                    amount_paid: Some(amount),
                    change: Some(change),
                    ..
                } if **method == "CASH"
                    && *amount == money("10.00")
                    && *change == money("5.00") => {}
                other => {
                    return Err(ContractTestFailure::assertion(
                        SCENARIO,
                        format!("unexpected payment event payload {other:?}"),
                    ))
                }
            }
        }
        other => {
            return Err(ContractTestFailure::assertion(
                SCENARIO,
                format!("expected CREATED then MARKED_PAID, observed {other:?}"),
            ))
        }
    }

    let short = engine_step(
        SCENARIO,
        "quick_sale",
        engine
            .quick_sale(vendor, vec![line(&snack, 1)], Tender::cash(money("1.00")))
            .await,
    )?;
    ensure(
        SCENARIO,
        short.status() == SaleStatus::Pending && short.change == money("0.00"),
        || format!("under-tendered checkout should stay pending, observed {short:?}"),
    )?;
    let stock = stock_of(SCENARIO, engine.store(), snack.id).await?;
    ensure(SCENARIO, stock == 7, || {
        format!("expected stock 7 after both checkouts, observed {stock}")
    })
}

pub async fn test_receipt_is_scoped_to_vendor<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: SaleStore + ProductCatalog + 'static,
{
    const SCENARIO: &str = "receipt_is_scoped_to_vendor";

    let engine = SaleEngine::new(make_store());
    let vendor = unique_user();
    let widget = seed(SCENARIO, engine.store(), product("Contract Widget", "5.00", 10)).await?;
    let created = engine_step(
        SCENARIO,
        "create_sale",
        engine.create_sale(vendor, vec![line(&widget, 3)], None).await,
    )?;
    let sale_id = created.sale.id;

    let receipt = engine_step(SCENARIO, "receipt", engine.receipt(sale_id, vendor).await)?;
    ensure(
        SCENARIO,
        receipt.receipt_number.as_str() == format!("RCP-{:06}", sale_id.into_inner())
            && receipt.lines.len() == 1
            && receipt.lines[0].name == widget.name
            && receipt.total == money("15.00")
            && receipt.subtotal == receipt.total,
        || format!("unexpected receipt {receipt:?}"),
    )?;

    match engine.receipt(sale_id, unique_user()).await {
        Err(SaleError::SaleNotFound(id)) if id == sale_id => Ok(()),
        other => Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("another vendor's receipt should be hidden, observed {other:?}"),
        )),
    }
}

/// Expands to one `#[tokio::test]` per contract scenario inside `mod $suite`.
///
/// `make_store` is called once per scenario (several times for
/// `injected_failures_roll_back`). Pass `ignore = "reason"` to mark the
/// generated tests `#[ignore]`, e.g. for backends that need Docker.
#[macro_export]
macro_rules! sale_store_contract_tests {
    (suite = $suite:ident, make_store = $make_store:expr $(, ignore = $reason:literal)? $(,)?) => {
        mod $suite {
            use $crate::contract::{
                test_commit_publishes_staged_writes, test_concurrent_checkouts_never_oversell,
                test_injected_failures_roll_back, test_list_sales_newest_first,
                test_lock_and_fetch_skips_unknown_products, test_mark_paid_is_idempotent,
                test_payment_reference_is_unique, test_quick_sale,
                test_receipt_is_scoped_to_vendor, test_rejected_sale_leaves_no_trace,
                test_rollback_discards_staged_writes, test_row_lock_blocks_second_unit_of_work,
                test_sale_lifecycle, test_search_products,
            };

            #[tokio::test(flavor = "multi_thread")]
            $(#[ignore = $reason])?
            async fn lock_and_fetch_skips_unknown_products_contract() {
                test_lock_and_fetch_skips_unknown_products($make_store)
                    .await
                    .expect("sale store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[ignore = $reason])?
            async fn commit_publishes_staged_writes_contract() {
                test_commit_publishes_staged_writes($make_store)
                    .await
                    .expect("sale store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[ignore = $reason])?
            async fn rollback_discards_staged_writes_contract() {
                test_rollback_discards_staged_writes($make_store)
                    .await
                    .expect("sale store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[ignore = $reason])?
            async fn row_lock_blocks_second_unit_of_work_contract() {
                test_row_lock_blocks_second_unit_of_work($make_store)
                    .await
                    .expect("sale store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[ignore = $reason])?
            async fn payment_reference_is_unique_contract() {
                test_payment_reference_is_unique($make_store)
                    .await
                    .expect("sale store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[ignore = $reason])?
            async fn concurrent_checkouts_never_oversell_contract() {
                test_concurrent_checkouts_never_oversell($make_store)
                    .await
                    .expect("sale store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[ignore = $reason])?
            async fn sale_lifecycle_contract() {
                test_sale_lifecycle($make_store)
                    .await
                    .expect("sale store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[ignore = $reason])?
            async fn mark_paid_is_idempotent_contract() {
                test_mark_paid_is_idempotent($make_store)
                    .await
                    .expect("sale store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[ignore = $reason])?
            async fn rejected_sale_leaves_no_trace_contract() {
                test_rejected_sale_leaves_no_trace($make_store)
                    .await
                    .expect("sale store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[ignore = $reason])?
            async fn injected_failures_roll_back_contract() {
                test_injected_failures_roll_back($make_store)
                    .await
                    .expect("sale store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[ignore = $reason])?
            async fn list_sales_newest_first_contract() {
                test_list_sales_newest_first($make_store)
                    .await
                    .expect("sale store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[ignore = $reason])?
            async fn search_products_contract() {
                test_search_products($make_store)
                    .await
                    .expect("sale store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[ignore = $reason])?
            async fn quick_sale_contract() {
                test_quick_sale($make_store)
                    .await
                    .expect("sale store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            $(#[ignore = $reason])?
            async fn receipt_is_scoped_to_vendor_contract() {
                test_receipt_is_scoped_to_vendor($make_store)
                    .await
                    .expect("sale store contract failed");
            }
        }
    };
}

pub use sale_store_contract_tests;
