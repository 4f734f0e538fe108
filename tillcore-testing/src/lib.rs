//! Shared test support for `TillCore` stores.
//!
//! - [`contract`]: the behavioural suite every [`tillcore::SaleStore`]
//!   backend must pass, exposed through [`sale_store_contract_tests!`].
//! - [`chaos`]: a store wrapper that fails chosen operations.
//! - [`fixtures`]: small builders for products, carts and operators.

#![forbid(unsafe_code)]
#![deny(
    bad_style,
    meta_variable_misuse,
    non_ascii_idents,
    rust_2018_idioms,
    unreachable_code,
    unused_imports,
    unused_must_use,
    unused_mut
)]
#![allow(missing_docs)]

pub mod chaos;
pub mod contract;
pub mod fixtures;

pub use chaos::*;
