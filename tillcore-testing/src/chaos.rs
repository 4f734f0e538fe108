use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use nutype::nutype;
use parking_lot::Mutex;
use rand::{random, rngs::StdRng, Rng, SeedableRng};
use tillcore::{
    InventoryTransaction, LedgerTransaction, Money, NewSaleEvent, Operation, PaymentReference,
    Product, ProductCatalog, ProductId, Sale, SaleEvent, SaleId, SaleItem, SaleScope, SaleStatus,
    SaleStore, SearchQuery, StockUpdate, StoreError, StoreResult, UnitOfWork, UserId,
};
use tracing::debug;

/// Probability value for fault injection rates.
///
/// Probability represents a value in the range [0.0, 1.0] where 0.0 means
/// never inject failures and 1.0 means always inject failures.
///
/// # Examples
///
/// ```ignore
/// use tillcore_testing::chaos::Probability;
///
/// let never = Probability::try_new(0.0).unwrap();
/// let always = Probability::try_new(1.0).unwrap();
///
/// assert!(Probability::try_new(1.5).is_err());
/// ```
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Into)
)]
pub struct Probability(f32);

/// Which store calls should fail.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    failure_probability: Probability,
    failing_operations: BTreeSet<Operation>,
}

impl ChaosConfig {
    /// Seeded configuration, so probabilistic runs repeat exactly.
    pub fn deterministic() -> Self {
        Self {
            deterministic_seed: Some(0),
            ..Self::default()
        }
    }

    /// Fail any call with the given probability (clamped to [0, 1]).
    #[must_use]
    pub fn with_failure_probability(mut self, probability: f32) -> Self {
        self.failure_probability = Probability::try_new(probability.clamp(0.0, 1.0))
            .expect("clamped value is always valid");
        self
    }

    /// Always fail calls performing `operation`.
    #[must_use]
    pub fn failing_on(mut self, operation: Operation) -> Self {
        let _ = self.failing_operations.insert(operation);
        self
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            failure_probability: Probability::try_new(0.0).expect("0.0 is valid probability"),
            failing_operations: BTreeSet::new(),
        }
    }
}

struct FaultInjector {
    config: ChaosConfig,
    rng: Mutex<StdRng>,
    injected: AtomicUsize,
}

impl FaultInjector {
    fn new(config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };
        Self {
            config,
            rng: Mutex::new(rng),
            injected: AtomicUsize::new(0),
        }
    }

    fn should_inject(&self, operation: Operation) -> bool {
        if self.config.failing_operations.contains(&operation) {
            return true;
        }

        let probability: f32 = self.config.failure_probability.into();
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.rng.lock().random_bool(f64::from(probability))
    }

    fn check(&self, operation: Operation) -> StoreResult<()> {
        if self.should_inject(operation) {
            let _ = self.injected.fetch_add(1, Ordering::Relaxed);
            debug!(%operation, "[chaos] injecting store failure");
            return Err(StoreError::StoreFailure { operation });
        }
        Ok(())
    }
}

/// Extension trait wrapping any store in a [`ChaosSaleStore`].
pub trait ChaosSaleStoreExt: Sized {
    /// Wrap `self` so the configured calls fail.
    fn with_chaos(self, config: ChaosConfig) -> ChaosSaleStore<Self>;
}

impl<S> ChaosSaleStoreExt for S
where
    S: SaleStore + ProductCatalog,
{
    fn with_chaos(self, config: ChaosConfig) -> ChaosSaleStore<Self> {
        ChaosSaleStore::new(self, config)
    }
}

/// Store wrapper that fails chosen operations, or random ones at the
/// configured probability, with [`StoreError::StoreFailure`] before they
/// reach the wrapped store.
///
/// Used to prove that a failure at any step of an engine operation leaves
/// the store exactly as it was.
pub struct ChaosSaleStore<S> {
    store: S,
    injector: Arc<FaultInjector>,
}

impl<S> ChaosSaleStore<S> {
    /// Wrap `store`.
    pub fn new(store: S, config: ChaosConfig) -> Self {
        Self {
            store,
            injector: Arc::new(FaultInjector::new(config)),
        }
    }

    /// The wrapped store, for checking state behind the faults.
    pub const fn inner(&self) -> &S {
        &self.store
    }

    /// Number of failures injected so far.
    pub fn injected_failures(&self) -> usize {
        self.injector.injected.load(Ordering::Relaxed)
    }
}

/// Unit of work handed out by a [`ChaosSaleStore`].
pub struct ChaosUnitOfWork<U> {
    inner: U,
    injector: Arc<FaultInjector>,
}

#[async_trait]
impl<S> SaleStore for ChaosSaleStore<S>
where
    S: SaleStore,
{
    type UnitOfWork = ChaosUnitOfWork<S::UnitOfWork>;

    async fn begin(&self) -> StoreResult<Self::UnitOfWork> {
        self.injector.check(Operation::BeginTransaction)?;
        Ok(ChaosUnitOfWork {
            inner: self.store.begin().await?,
            injector: Arc::clone(&self.injector),
        })
    }

    async fn sale(&self, sale_id: SaleId) -> StoreResult<Option<Sale>> {
        self.injector.check(Operation::ReadSales)?;
        self.store.sale(sale_id).await
    }

    async fn sale_items(&self, sale_id: SaleId) -> StoreResult<Vec<SaleItem>> {
        self.injector.check(Operation::ReadItems)?;
        self.store.sale_items(sale_id).await
    }

    async fn sale_events(&self, sale_id: SaleId) -> StoreResult<Vec<SaleEvent>> {
        self.injector.check(Operation::ReadEvents)?;
        self.store.sale_events(sale_id).await
    }

    async fn list_sales(&self, scope: SaleScope) -> StoreResult<Vec<Sale>> {
        self.injector.check(Operation::ReadSales)?;
        self.store.list_sales(scope).await
    }
}

#[async_trait]
impl<S> ProductCatalog for ChaosSaleStore<S>
where
    S: ProductCatalog,
{
    async fn products(&self, product_ids: &BTreeSet<ProductId>) -> StoreResult<Vec<Product>> {
        self.injector.check(Operation::ReadProducts)?;
        self.store.products(product_ids).await
    }

    async fn search_products(
        &self,
        query: &SearchQuery,
        limit: usize,
    ) -> StoreResult<Vec<Product>> {
        self.injector.check(Operation::ReadProducts)?;
        self.store.search_products(query, limit).await
    }

    async fn put_product(&self, product: Product) -> StoreResult<()> {
        self.injector.check(Operation::PutProduct)?;
        self.store.put_product(product).await
    }
}

#[async_trait]
impl<U> InventoryTransaction for ChaosUnitOfWork<U>
where
    U: UnitOfWork,
{
    async fn lock_and_fetch(
        &mut self,
        product_ids: &BTreeSet<ProductId>,
    ) -> StoreResult<BTreeMap<ProductId, Product>> {
        self.injector.check(Operation::LockProducts)?;
        self.inner.lock_and_fetch(product_ids).await
    }

    async fn batch_update_stock(&mut self, updates: &[StockUpdate]) -> StoreResult<()> {
        self.injector.check(Operation::UpdateStock)?;
        self.inner.batch_update_stock(updates).await
    }
}

#[async_trait]
impl<U> LedgerTransaction for ChaosUnitOfWork<U>
where
    U: UnitOfWork,
{
    async fn create_sale(&mut self, vendor: UserId, notes: Option<String>) -> StoreResult<Sale> {
        self.injector.check(Operation::CreateSale)?;
        self.inner.create_sale(vendor, notes).await
    }

    async fn batch_create_items(&mut self, items: &[SaleItem]) -> StoreResult<()> {
        self.injector.check(Operation::CreateItems)?;
        self.inner.batch_create_items(items).await
    }

    async fn update_sale_total(&mut self, sale_id: SaleId, total: Money) -> StoreResult<Sale> {
        self.injector.check(Operation::UpdateSaleTotal)?;
        self.inner.update_sale_total(sale_id, total).await
    }

    async fn lock_sale(&mut self, sale_id: SaleId) -> StoreResult<Option<Sale>> {
        self.injector.check(Operation::LockSale)?;
        self.inner.lock_sale(sale_id).await
    }

    async fn sale_items(&mut self, sale_id: SaleId) -> StoreResult<Vec<SaleItem>> {
        self.injector.check(Operation::ReadItems)?;
        self.inner.sale_items(sale_id).await
    }

    async fn update_sale_status(
        &mut self,
        sale_id: SaleId,
        status: SaleStatus,
        payment_reference: Option<PaymentReference>,
    ) -> StoreResult<Sale> {
        self.injector.check(Operation::UpdateSaleStatus)?;
        self.inner
            .update_sale_status(sale_id, status, payment_reference)
            .await
    }

    async fn append_event(&mut self, event: NewSaleEvent) -> StoreResult<SaleEvent> {
        self.injector.check(Operation::AppendEvent)?;
        self.inner.append_event(event).await
    }
}

#[async_trait]
impl<U> UnitOfWork for ChaosUnitOfWork<U>
where
    U: UnitOfWork,
{
    async fn commit(self) -> StoreResult<()> {
        // A failed commit drops the inner unit of work, which rolls it back.
        self.injector.check(Operation::CommitTransaction)?;
        self.inner.commit().await
    }

    async fn rollback(self) -> StoreResult<()> {
        self.injector.check(Operation::RollbackTransaction)?;
        self.inner.rollback().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillcore_memory::InMemorySaleStore;

    #[test]
    fn deterministic_config_sets_seed() {
        let default_is_none = ChaosConfig::default().deterministic_seed.is_none();
        let deterministic_is_some = ChaosConfig::deterministic().deterministic_seed.is_some();

        assert!(default_is_none && deterministic_is_some);
    }

    #[test]
    fn failure_probability_is_clamped() {
        let config = ChaosConfig::default().with_failure_probability(3.0);

        assert_eq!(f32::from(config.failure_probability), 1.0);
    }

    #[tokio::test]
    async fn zero_probability_passes_every_call_through() {
        let store = InMemorySaleStore::new().with_chaos(ChaosConfig::deterministic());

        let uow = store.begin().await.expect("begin should pass through");
        uow.commit().await.expect("commit should pass through");

        assert_eq!(store.injected_failures(), 0);
    }

    #[tokio::test]
    async fn targeted_operation_always_fails() {
        let store = InMemorySaleStore::new()
            .with_chaos(ChaosConfig::deterministic().failing_on(Operation::CreateSale));
        let mut uow = store.begin().await.expect("begin is not targeted");

        let result = uow.create_sale(crate::fixtures::user(1), None).await;

        assert_eq!(
            result,
            Err(StoreError::StoreFailure {
                operation: Operation::CreateSale
            })
        );
        assert_eq!(store.injected_failures(), 1);
    }
}
