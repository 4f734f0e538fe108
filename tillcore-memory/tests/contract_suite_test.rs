//! Runs the shared `SaleStore` contract suite against the in-memory store.
//!
//! Scenarios added to the suite are picked up here automatically.

use tillcore_testing::contract::sale_store_contract_tests;

sale_store_contract_tests! {
    suite = in_memory,
    make_store = tillcore_memory::InMemorySaleStore::new,
}
