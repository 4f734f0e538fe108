//! Postgres-specific behaviour not covered by the shared contract suite.

mod common;

use common::PostgresTestFixture;
use sqlx::Row;
use tillcore::{SaleEngine, SaleStatus};
use tillcore_testing::fixtures::{line, money, product, unique_user};

#[tokio::test]
#[ignore = "requires docker"]
async fn migrations_can_be_rerun() {
    // Given: a store whose schema is already migrated
    let fixture = PostgresTestFixture::new().await;

    // When: the migrations run again
    let rerun = fixture.store.migrate().await;

    // Then: nothing is applied twice
    assert!(rerun.is_ok(), "rerunning migrations failed: {rerun:?}");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn event_payloads_are_stored_as_tagged_json() {
    let fixture = PostgresTestFixture::new().await;
    let engine = SaleEngine::new(fixture.store.clone());
    let widget = product("Widget", "5.00", 10);
    tillcore::ProductCatalog::put_product(engine.store(), widget.clone())
        .await
        .unwrap();

    let details = engine
        .create_sale(unique_user(), vec![line(&widget, 3)], None)
        .await
        .unwrap();

    let row = sqlx::query(
        "SELECT event_type, payload->>'event_type' AS tag, payload->>'total' AS total
         FROM tillcore_sale_events WHERE sale_id = $1",
    )
    .bind(details.sale.id.into_inner())
    .fetch_one(fixture.store.pool())
    .await
    .unwrap();
    let event_type: String = row.get("event_type");
    let tag: String = row.get("tag");
    let total: String = row.get("total");
    assert_eq!(event_type, "CREATED");
    assert_eq!(tag, "CREATED");
    assert_eq!(total, "15.00");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn schema_rejects_a_second_sale_with_the_same_reference() {
    let fixture = PostgresTestFixture::new().await;
    let engine = SaleEngine::new(fixture.store.clone());
    let widget = product("Widget", "5.00", 10);
    tillcore::ProductCatalog::put_product(engine.store(), widget.clone())
        .await
        .unwrap();
    let vendor = unique_user();
    let first = engine
        .create_sale(vendor, vec![line(&widget, 1)], None)
        .await
        .unwrap()
        .sale;
    let second = engine
        .create_sale(vendor, vec![line(&widget, 1)], None)
        .await
        .unwrap()
        .sale;
    let reference = tillcore::PaymentReference::try_new("TERM-42").unwrap();
    let _ = engine
        .mark_paid(first.id, reference.clone(), money("5.00"), None)
        .await
        .unwrap();

    let result = engine
        .mark_paid(second.id, reference, money("5.00"), None)
        .await;

    assert!(matches!(
        result,
        Err(tillcore::SaleError::DuplicatePaymentReference(_))
    ));
    let stored = engine.sale_details(second.id).await.unwrap().sale;
    assert_eq!(stored.status, SaleStatus::Pending);
}
