//! Concurrent tills contending for the same rows.

use std::sync::Arc;

use tillcore::{
    PaymentDisposition, PaymentReference, ProductCatalog, SaleEngine, SaleError, SaleEventType,
    SaleStatus,
};
use tillcore_memory::InMemorySaleStore;
use tillcore_testing::fixtures::{line, money, product, user};
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checkouts_sell_exactly_the_stock_on_hand() {
    // Given: five units and twelve tills each selling one
    let widget = product("Widget", "1.50", 5);
    let engine = Arc::new(SaleEngine::new(InMemorySaleStore::with_products([
        widget.clone(),
    ])));

    // When: they all check out at once
    let mut tills = JoinSet::new();
    for till in 0..12 {
        let engine = Arc::clone(&engine);
        let cart = vec![line(&widget, 1)];
        let _ = tills.spawn(async move { engine.create_sale(user(till + 1), cart, None).await });
    }
    let mut sold = 0;
    let mut refused = 0;
    while let Some(outcome) = tills.join_next().await {
        match outcome.expect("till task should not panic") {
            Ok(_) => sold += 1,
            Err(SaleError::InsufficientStock { available: 0, .. }) => refused += 1,
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }

    // Then: exactly five sales went through and stock never went negative
    assert_eq!((sold, refused), (5, 7));
    let remaining = engine
        .store()
        .product(widget.id)
        .await
        .unwrap()
        .unwrap()
        .stock;
    assert_eq!(remaining, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_carts_lock_in_a_consistent_order() {
    // Given: two products and tills ringing them up in opposite orders
    let tea = product("Green Tea", "2.50", 100);
    let scone = product("Cheese Scone", "3.20", 100);
    let engine = Arc::new(SaleEngine::new(InMemorySaleStore::with_products([
        tea.clone(),
        scone.clone(),
    ])));

    // When: forty carts race
    let mut tills = JoinSet::new();
    for till in 0..40 {
        let engine = Arc::clone(&engine);
        let cart = if till % 2 == 0 {
            vec![line(&tea, 1), line(&scone, 2)]
        } else {
            vec![line(&scone, 2), line(&tea, 1)]
        };
        let _ = tills.spawn(async move { engine.create_sale(user(1), cart, None).await });
    }
    while let Some(outcome) = tills.join_next().await {
        let _ = outcome
            .expect("till task should not panic")
            .expect("every cart fits the stock on hand");
    }

    // Then: no deadlock and the stock reflects every sale
    let tea_stock = engine.store().product(tea.id).await.unwrap().unwrap().stock;
    let scone_stock = engine.store().product(scone.id).await.unwrap().unwrap().stock;
    assert_eq!((tea_stock, scone_stock), (60, 20));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_and_pay_race_has_a_single_winner() {
    let widget = product("Widget", "5.00", 10);
    let engine = Arc::new(SaleEngine::new(InMemorySaleStore::with_products([
        widget.clone(),
    ])));
    let sale = engine
        .create_sale(user(1), vec![line(&widget, 2)], None)
        .await
        .unwrap()
        .sale;

    let paying = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .mark_paid(
                    sale.id,
                    PaymentReference::try_new("RACE-1").unwrap(),
                    money("10.00"),
                    None,
                )
                .await
        })
    };
    let cancelling = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.cancel(sale.id, user(2), None).await })
    };
    let paid = paying.await.unwrap();
    let cancelled = cancelling.await.unwrap();

    let stored = engine.sale_details(sale.id).await.unwrap().sale;
    let stock = engine.store().product(widget.id).await.unwrap().unwrap().stock;
    match (paid, cancelled) {
        (Ok(outcome), Err(SaleError::NotPending { status, .. })) => {
            assert_eq!(outcome.disposition, PaymentDisposition::Completed);
            assert_eq!(status, SaleStatus::Completed);
            assert_eq!(stored.status, SaleStatus::Completed);
            assert_eq!(stock, 8);
        }
        (Err(SaleError::SaleCancelled(_)), Ok(_)) => {
            assert_eq!(stored.status, SaleStatus::Cancelled);
            assert_eq!(stock, 10);
        }
        other => panic!("exactly one transition should win, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_payment_callbacks_record_one_payment() {
    let widget = product("Widget", "5.00", 10);
    let engine = Arc::new(SaleEngine::new(InMemorySaleStore::with_products([
        widget.clone(),
    ])));
    let sale = engine
        .create_sale(user(1), vec![line(&widget, 1)], None)
        .await
        .unwrap()
        .sale;

    let mut callbacks = JoinSet::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        let _ = callbacks.spawn(async move {
            engine
                .mark_paid(
                    sale.id,
                    PaymentReference::try_new("CALLBACK-1").unwrap(),
                    money("5.00"),
                    None,
                )
                .await
        });
    }
    let mut completed = 0;
    while let Some(outcome) = callbacks.join_next().await {
        let outcome = outcome.unwrap().expect("retried callbacks succeed");
        if outcome.disposition == PaymentDisposition::Completed {
            completed += 1;
        } else {
            assert_eq!(outcome.disposition, PaymentDisposition::AlreadyCompleted);
        }
    }

    assert_eq!(completed, 1);
    let paid_events = engine
        .sale_events(sale.id)
        .await
        .unwrap()
        .iter()
        .filter(|event| event.event_type() == SaleEventType::MarkedPaid)
        .count();
    assert_eq!(paid_events, 1);
}
