//! Walk a till through a typical shift against the in-memory store.
//!
//! Run with `RUST_LOG=debug cargo run -p tillcore-memory --example checkout`
//! to see the engine's log output.

use rust_decimal_macros::dec;
use tillcore::{
    CancellationReason, CartLine, Money, PaymentReference, Product, ProductId, ProductName,
    Quantity, SaleEngine, Tender, UserId,
};
use tillcore_memory::InMemorySaleStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let tea = Product::new(
        ProductId::generate(),
        ProductName::try_new("Green Tea")?,
        Money::new(dec!(2.50))?,
        12,
    );
    let scone = Product::new(
        ProductId::generate(),
        ProductName::try_new("Cheese Scone")?,
        Money::new(dec!(3.20))?,
        4,
    );
    let engine = SaleEngine::new(InMemorySaleStore::with_products([tea.clone(), scone.clone()]));
    let vendor = UserId::try_new(1)?;

    // Counter sale paid later by card terminal callback.
    let pending = engine
        .create_sale(
            vendor,
            vec![
                CartLine::new(tea.id, Quantity::try_new(2)?),
                CartLine::new(scone.id, Quantity::try_new(1)?),
            ],
            Some("table 3".to_string()),
        )
        .await?;
    println!("recorded sale {} for {}", pending.sale.id, pending.sale.total_amount);

    let outcome = engine
        .mark_paid(
            pending.sale.id,
            PaymentReference::try_new("TERM-0001")?,
            pending.sale.total_amount,
            Some(vendor),
        )
        .await?;
    println!("{}", outcome.disposition.detail());

    // Cash at the till, with change.
    let checkout = engine
        .quick_sale(
            vendor,
            vec![CartLine::new(scone.id, Quantity::try_new(2)?)],
            Tender::cash(Money::new(dec!(10.00))?),
        )
        .await?;
    println!(
        "{} paid {} change {}",
        checkout.receipt_number, checkout.payment_received, checkout.change
    );

    // A sale the customer walked away from.
    let abandoned = engine
        .create_sale(vendor, vec![CartLine::new(tea.id, Quantity::try_new(5)?)], None)
        .await?;
    let _ = engine
        .cancel(
            abandoned.sale.id,
            vendor,
            Some(CancellationReason::try_new("customer left")?),
        )
        .await?;

    println!("\n{}", engine.receipt(pending.sale.id, vendor).await?);

    for product in engine.search_products("tea").await? {
        println!("{} - {} in stock", product.name, product.stock);
    }

    Ok(())
}
