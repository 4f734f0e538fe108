//! Engine behaviour against the in-memory store, one business rule per test.

use tillcore::{
    CancellationReason, CartLine, EngineConfig, ErrorKind, Operation, PaymentDisposition,
    PaymentMethod, PaymentReference, PosReferencePrefix, Product, ProductCatalog, ProductId,
    ReceiptPrefix, SaleEngine, SaleError, SaleEventPayload, SaleEventType, SaleScope, SaleStatus,
    SaleStore, SearchLimit, Tender, ValidationError,
};
use tillcore_memory::InMemorySaleStore;
use tillcore_testing::chaos::{ChaosConfig, ChaosSaleStoreExt};
use tillcore_testing::fixtures::{line, money, product, quantity, user};

fn engine_with(products: &[Product]) -> SaleEngine<InMemorySaleStore> {
    SaleEngine::new(InMemorySaleStore::with_products(products.iter().cloned()))
}

fn reference(raw: &str) -> PaymentReference {
    PaymentReference::try_new(raw).expect("valid payment reference")
}

async fn stock(engine: &SaleEngine<InMemorySaleStore>, product_id: ProductId) -> u32 {
    engine
        .store()
        .product(product_id)
        .await
        .expect("product read should succeed")
        .expect("product should exist")
        .stock
}

#[tokio::test]
async fn create_sale_prices_lines_and_decrements_stock() {
    // Given: tea at 2.50 with 12 on hand and scones at 3.20 with 4 on hand
    let tea = product("Green Tea", "2.50", 12);
    let scone = product("Cheese Scone", "3.20", 4);
    let engine = engine_with(&[tea.clone(), scone.clone()]);
    let vendor = user(7);

    // When: two teas and a scone are rung up
    let details = engine
        .create_sale(
            vendor,
            vec![line(&tea, 2), line(&scone, 1)],
            Some("table 3".to_string()),
        )
        .await
        .expect("sale should be recorded");

    // Then: the sale is pending with the summed total and stock is reserved
    assert_eq!(details.sale.status, SaleStatus::Pending);
    assert_eq!(details.sale.total_amount, money("8.20"));
    assert_eq!(details.sale.vendor, vendor);
    assert_eq!(details.sale.notes.as_deref(), Some("table 3"));
    let line_totals: Vec<_> = details.items.iter().map(|item| item.line_total()).collect();
    assert_eq!(line_totals, vec![money("5.00"), money("3.20")]);
    assert_eq!(details.items_total().unwrap(), details.sale.total_amount);
    assert_eq!(stock(&engine, tea.id).await, 10);
    assert_eq!(stock(&engine, scone.id).await, 3);

    let events = engine.sale_events(details.sale.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].actor, Some(vendor));
    assert_eq!(
        events[0].payload,
        SaleEventPayload::Created {
            total: money("8.20")
        }
    );
}

#[tokio::test]
async fn price_override_replaces_the_catalog_price() {
    let tea = product("Green Tea", "2.50", 12);
    let engine = engine_with(&[tea.clone()]);

    let details = engine
        .create_sale(
            user(7),
            vec![line(&tea, 3).with_unit_price(money("2.00"))],
            None,
        )
        .await
        .unwrap();

    assert_eq!(details.items[0].unit_price(), money("2.00"));
    assert_eq!(details.sale.total_amount, money("6.00"));
}

#[tokio::test]
async fn stock_may_be_sold_down_to_zero() {
    let scone = product("Cheese Scone", "3.20", 4);
    let engine = engine_with(&[scone.clone()]);

    let details = engine
        .create_sale(user(7), vec![line(&scone, 4)], None)
        .await
        .unwrap();

    assert_eq!(details.sale.total_amount, money("12.80"));
    assert_eq!(stock(&engine, scone.id).await, 0);
}

#[tokio::test]
async fn cart_validation_happens_before_any_storage_access() {
    // Given: a store that fails as soon as a unit of work is opened
    let tea = product("Green Tea", "2.50", 12);
    let engine = SaleEngine::new(
        InMemorySaleStore::with_products([tea.clone()])
            .with_chaos(ChaosConfig::deterministic().failing_on(Operation::BeginTransaction)),
    );

    // When: carts that are malformed on their face are submitted
    let empty = engine.create_sale(user(7), Vec::new(), None).await;
    let duplicated = engine
        .create_sale(user(7), vec![line(&tea, 1), line(&tea, 2)], None)
        .await;

    // Then: they are rejected as validation errors and storage is never hit
    assert!(matches!(
        empty,
        Err(SaleError::Validation(ValidationError::EmptyCart))
    ));
    assert!(matches!(
        duplicated,
        Err(SaleError::Validation(ValidationError::DuplicateProduct(id))) if id == tea.id
    ));
    assert_eq!(engine.store().injected_failures(), 0);
}

#[test]
fn zero_quantity_lines_cannot_be_built() {
    let error = CartLine::parse(ProductId::generate(), 0, None).unwrap_err();

    assert!(matches!(error, ValidationError::Quantity(_)));
}

#[tokio::test]
async fn unknown_product_is_not_found_and_nothing_is_recorded() {
    let tea = product("Green Tea", "2.50", 12);
    let engine = engine_with(&[tea.clone()]);
    let vendor = user(7);
    let ghost = ProductId::generate();

    let result = engine
        .create_sale(
            vendor,
            vec![line(&tea, 1), CartLine::new(ghost, quantity(1))],
            None,
        )
        .await;

    assert!(matches!(result, Err(SaleError::ProductNotFound(id)) if id == ghost));
    assert_eq!(stock(&engine, tea.id).await, 12);
    assert!(engine
        .list_sales(SaleScope::Vendor(vendor))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn mark_paid_with_the_wrong_amount_leaves_the_sale_pending() {
    let widget = product("Widget", "5.00", 10);
    let engine = engine_with(&[widget.clone()]);
    let sale = engine
        .create_sale(user(7), vec![line(&widget, 3)], None)
        .await
        .unwrap()
        .sale;

    let result = engine
        .mark_paid(sale.id, reference("PAY-1"), money("14.00"), None)
        .await;

    assert!(matches!(
        result,
        Err(SaleError::Validation(ValidationError::AmountMismatch { expected, provided }))
            if expected == money("15.00") && provided == money("14.00")
    ));
    let details = engine.sale_details(sale.id).await.unwrap();
    assert_eq!(details.sale.status, SaleStatus::Pending);
    assert_eq!(details.sale.payment_reference, None);
    assert_eq!(engine.sale_events(sale.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn repeated_payment_with_a_different_amount_is_rejected() {
    // Given: a 15.00 sale already paid in full
    let widget = product("Widget", "5.00", 10);
    let engine = engine_with(&[widget.clone()]);
    let sale = engine
        .create_sale(user(7), vec![line(&widget, 3)], None)
        .await
        .unwrap()
        .sale;
    let _ = engine
        .mark_paid(sale.id, reference("PAY-1"), money("15.00"), None)
        .await
        .unwrap();

    // When: the same callback arrives again claiming 1.00
    let retried = engine
        .mark_paid(sale.id, reference("PAY-1"), money("1.00"), None)
        .await;

    // Then: the amount is refused and the recorded payment is untouched
    assert!(matches!(
        retried,
        Err(SaleError::Validation(ValidationError::AmountMismatch { expected, provided }))
            if expected == money("15.00") && provided == money("1.00")
    ));
    let details = engine.sale_details(sale.id).await.unwrap();
    assert_eq!(details.sale.status, SaleStatus::Completed);
    assert_eq!(details.sale.payment_reference, Some(reference("PAY-1")));
    assert_eq!(engine.sale_events(sale.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn mark_paid_records_reference_and_actor() {
    let widget = product("Widget", "5.00", 10);
    let engine = engine_with(&[widget.clone()]);
    let cashier = user(9);
    let sale = engine
        .create_sale(user(7), vec![line(&widget, 1)], None)
        .await
        .unwrap()
        .sale;

    let outcome = engine
        .mark_paid(sale.id, reference("PAY-2"), money("5.00"), Some(cashier))
        .await
        .unwrap();

    assert_eq!(outcome.disposition, PaymentDisposition::Completed);
    assert_eq!(outcome.disposition.detail(), "Sale is marked as completed.");
    assert_eq!(outcome.sale.status, SaleStatus::Completed);
    let events = engine.sale_events(sale.id).await.unwrap();
    let paid = events.last().unwrap();
    assert_eq!(paid.actor, Some(cashier));
    assert_eq!(
        paid.payload,
        SaleEventPayload::marked_paid(reference("PAY-2"))
    );
}

#[tokio::test]
async fn payment_reference_held_by_another_sale_is_a_conflict() {
    // Given: two pending sales, the first already paid with PAY-3
    let widget = product("Widget", "5.00", 10);
    let engine = engine_with(&[widget.clone()]);
    let first = engine
        .create_sale(user(7), vec![line(&widget, 1)], None)
        .await
        .unwrap()
        .sale;
    let second = engine
        .create_sale(user(7), vec![line(&widget, 1)], None)
        .await
        .unwrap()
        .sale;
    let _ = engine
        .mark_paid(first.id, reference("PAY-3"), money("5.00"), None)
        .await
        .unwrap();

    // When: the second sale is paid with the same reference
    let result = engine
        .mark_paid(second.id, reference("PAY-3"), money("5.00"), None)
        .await;

    // Then: it is rejected and the second sale is untouched
    match result {
        Err(error @ SaleError::DuplicatePaymentReference(_)) => {
            assert_eq!(error.kind(), ErrorKind::Conflict);
        }
        other => panic!("expected a duplicate reference conflict, got {other:?}"),
    }
    let second = engine.sale_details(second.id).await.unwrap().sale;
    assert_eq!(second.status, SaleStatus::Pending);
    let types: Vec<_> = engine
        .sale_events(second.id)
        .await
        .unwrap()
        .iter()
        .map(|event| event.event_type())
        .collect();
    assert_eq!(types, vec![SaleEventType::Created]);
}

#[tokio::test]
async fn unknown_sales_are_not_found() {
    let engine = engine_with(&[]);
    let missing = tillcore::SaleId::try_new(404).unwrap();

    let paid = engine
        .mark_paid(missing, reference("PAY-4"), money("1.00"), None)
        .await;
    let cancelled = engine.cancel(missing, user(1), None).await;
    let events = engine.sale_events(missing).await;
    let details = engine.sale_details(missing).await;

    assert!(matches!(paid, Err(SaleError::SaleNotFound(id)) if id == missing));
    assert!(matches!(cancelled, Err(SaleError::SaleNotFound(id)) if id == missing));
    assert!(matches!(events, Err(SaleError::SaleNotFound(_))));
    assert!(matches!(details, Err(SaleError::SaleNotFound(_))));
}

#[tokio::test]
async fn cancel_records_reason_and_actor() {
    let widget = product("Widget", "5.00", 10);
    let engine = engine_with(&[widget.clone()]);
    let supervisor = user(2);
    let sale = engine
        .create_sale(user(7), vec![line(&widget, 4)], None)
        .await
        .unwrap()
        .sale;
    let reason = CancellationReason::try_new("customer left").unwrap();

    let details = engine
        .cancel(sale.id, supervisor, Some(reason.clone()))
        .await
        .unwrap();

    assert_eq!(details.sale.status, SaleStatus::Cancelled);
    assert_eq!(details.items.len(), 1);
    assert_eq!(stock(&engine, widget.id).await, 10);
    let events = engine.sale_events(sale.id).await.unwrap();
    let cancelled = events.last().unwrap();
    assert_eq!(cancelled.actor, Some(supervisor));
    assert_eq!(
        cancelled.payload,
        SaleEventPayload::Cancelled {
            reason: Some(reason)
        }
    );
}

#[tokio::test]
async fn quick_sale_names_the_tender_method_in_the_reference() {
    let widget = product("Widget", "5.00", 10);
    let engine = engine_with(&[widget.clone()]);
    let card = PaymentMethod::try_new("card").unwrap();

    let receipt = engine
        .quick_sale(
            user(7),
            vec![line(&widget, 2)],
            Tender::new(money("10.00"), card),
        )
        .await
        .unwrap();

    let sale = &receipt.details.sale;
    assert_eq!(receipt.status(), SaleStatus::Completed);
    assert_eq!(receipt.change, money("0.00"));
    assert_eq!(receipt.item_count(), 1);
    assert_eq!(
        sale.payment_reference.as_deref().map(String::as_str),
        Some(format!("POS-{}-CARD", sale.id).as_str())
    );
    assert_eq!(
        receipt.receipt_number.as_str(),
        format!("RCP-{:06}", sale.id.into_inner())
    );
}

#[tokio::test]
async fn configured_prefixes_shape_receipts_and_references() {
    let widget = product("Widget", "5.00", 10);
    let config = EngineConfig::default()
        .with_receipt_prefix(ReceiptPrefix::try_new("inv").unwrap())
        .with_pos_reference_prefix(PosReferencePrefix::try_new("till").unwrap());
    let engine = SaleEngine::with_config(InMemorySaleStore::with_products([widget.clone()]), config);

    let receipt = engine
        .quick_sale(user(7), vec![line(&widget, 1)], Tender::cash(money("5.00")))
        .await
        .unwrap();

    assert_eq!(receipt.receipt_number.as_str(), "INV-000001");
    assert_eq!(
        receipt.details.sale.payment_reference,
        Some(reference("TILL-1-CASH"))
    );
}

#[tokio::test]
async fn receipt_lists_lines_and_prints() {
    let tea = product("Green Tea", "2.50", 12);
    let scone = product("Cheese Scone", "3.20", 4);
    let engine = engine_with(&[tea.clone(), scone.clone()]);
    let vendor = user(7);
    let sale = engine
        .create_sale(vendor, vec![line(&tea, 2), line(&scone, 1)], None)
        .await
        .unwrap()
        .sale;

    let receipt = engine.receipt(sale.id, vendor).await.unwrap();

    assert_eq!(receipt.receipt_number.as_str(), "RCP-000001");
    assert_eq!(receipt.subtotal, money("8.20"));
    assert_eq!(receipt.total, money("8.20"));
    assert_eq!(receipt.status, SaleStatus::Pending);
    let printed = receipt.to_string();
    assert!(printed.starts_with("RCP-000001\n"));
    assert!(printed.contains("Green Tea x2 @ 2.50 = 5.00"));
    assert!(printed.contains("Cheese Scone x1 @ 3.20 = 3.20"));
    assert!(printed.ends_with("status PENDING"));
}

#[tokio::test]
async fn search_respects_the_configured_limit() {
    let teas = [
        product("Assam Tea", "2.00", 5),
        product("Black Tea", "2.00", 5),
        product("Chai Tea", "2.00", 5),
    ];
    let config = EngineConfig::default().with_search_limit(SearchLimit::try_new(2).unwrap());
    let engine = SaleEngine::with_config(InMemorySaleStore::with_products(teas.clone()), config);

    let found = engine.search_products(" tea ").await.unwrap();

    let names: Vec<_> = found.iter().map(|product| product.name.to_string()).collect();
    assert_eq!(names, vec!["Assam Tea", "Black Tea"]);
}

#[tokio::test]
async fn search_rejects_blank_and_oversized_queries() {
    let engine = engine_with(&[]);

    let blank = engine.search_products("").await;
    let oversized = engine.search_products(&"t".repeat(101)).await;

    assert!(matches!(
        blank,
        Err(SaleError::Validation(ValidationError::SearchQuery(_)))
    ));
    assert!(matches!(
        oversized,
        Err(SaleError::Validation(ValidationError::SearchQuery(_)))
    ));
}

#[tokio::test]
async fn list_sales_separates_vendors() {
    let widget = product("Widget", "1.00", 10);
    let engine = engine_with(&[widget.clone()]);
    let alice = user(1);
    let bob = user(2);
    for vendor in [alice, bob, alice] {
        let _ = engine
            .create_sale(vendor, vec![line(&widget, 1)], None)
            .await
            .unwrap();
    }

    let alice_sales = engine.list_sales(SaleScope::Vendor(alice)).await.unwrap();
    let all_sales = engine.store().list_sales(SaleScope::All).await.unwrap();

    assert_eq!(alice_sales.len(), 2);
    assert!(alice_sales.iter().all(|sale| sale.vendor == alice));
    let all_ids: Vec<i64> = all_sales.iter().map(|sale| sale.id.into_inner()).collect();
    assert_eq!(all_ids, vec![3, 2, 1]);
}
