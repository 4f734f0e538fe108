//! Property-based checks of the sale invariants: totals always equal the
//! sum of their lines, stock moves by exactly the quantities sold, and a
//! cancellation restores it.

use proptest::prelude::*;
use rust_decimal::Decimal;
use tillcore::{CartLine, Money, ProductCatalog, SaleEngine, SaleError};
use tillcore_memory::InMemorySaleStore;
use tillcore_testing::fixtures::{product, quantity, user};

fn arb_money() -> impl Strategy<Value = Money> {
    (0u64..100_000).prop_map(|cents| Money::from_cents(cents).expect("cents within range"))
}

// (price, stock, requested units)
fn arb_lines() -> impl Strategy<Value = Vec<(Money, u32, u32)>> {
    prop::collection::vec((arb_money(), 0u32..20, 1u32..10), 1..6)
}

proptest! {
    #[test]
    fn totals_and_stock_follow_the_cart(lines in arb_lines()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let products: Vec<_> = lines
                .iter()
                .enumerate()
                .map(|(index, (price, stock, _))| {
                    let mut p = product(&format!("Item {index}"), "1.00", *stock);
                    p.price = *price;
                    p
                })
                .collect();
            let engine = SaleEngine::new(InMemorySaleStore::with_products(products.clone()));
            let cart: Vec<_> = products
                .iter()
                .zip(&lines)
                .map(|(p, (_, _, units))| CartLine::new(p.id, quantity(*units)))
                .collect();
            let fits = lines.iter().all(|(_, stock, units)| units <= stock);

            let result = engine.create_sale(user(1), cart, None).await;

            match result {
                Ok(details) => {
                    prop_assert!(fits);
                    let expected: Decimal = lines
                        .iter()
                        .map(|(price, _, units)| price.amount() * Decimal::from(*units))
                        .sum();
                    prop_assert_eq!(details.sale.total_amount.amount(), expected);
                    prop_assert_eq!(details.items_total().unwrap(), details.sale.total_amount);
                    for (p, (_, stock, units)) in products.iter().zip(&lines) {
                        let now = engine.store().product(p.id).await.unwrap().unwrap().stock;
                        prop_assert_eq!(now, stock - units);
                    }

                    let _ = engine.cancel(details.sale.id, user(1), None).await.unwrap();
                    for (p, (_, stock, _)) in products.iter().zip(&lines) {
                        let now = engine.store().product(p.id).await.unwrap().unwrap().stock;
                        prop_assert_eq!(now, *stock);
                    }
                }
                Err(SaleError::InsufficientStock { .. }) => {
                    prop_assert!(!fits);
                    for (p, (_, stock, _)) in products.iter().zip(&lines) {
                        let now = engine.store().product(p.id).await.unwrap().unwrap().stock;
                        prop_assert_eq!(now, *stock);
                    }
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
            Ok(())
        })?;
    }

    #[test]
    fn tender_change_never_goes_negative(tendered in arb_money(), total in arb_money()) {
        let tender = tillcore::Tender::cash(tendered);

        match tender.change_for(total) {
            Some(change) => {
                prop_assert!(tendered >= total);
                prop_assert_eq!(change.amount(), tendered.amount() - total.amount());
            }
            None => prop_assert!(tendered < total),
        }
    }
}
