//! Engine configuration with type-safe validation.
//!
//! Limits are `nutype` newtypes so an out-of-range value cannot be
//! constructed, and every field has a default matching the till's
//! out-of-the-box behavior.

use nutype::nutype;
use serde::{Deserialize, Serialize};

/// Maximum number of products returned by a till search.
///
/// Validated to be between 1 and 100.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100),
    default = 20,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Default,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct SearchLimit(usize);

/// Prefix used for receipt numbers (`RCP-000042`).
#[nutype(
    sanitize(trim, uppercase),
    validate(not_empty, len_char_max = 8),
    derive(Debug, Clone, PartialEq, Eq, AsRef, Display, Serialize, Deserialize)
)]
pub struct ReceiptPrefix(String);

/// Prefix of payment references generated by till checkouts
/// (`POS-42-CASH`).
#[nutype(
    sanitize(trim, uppercase),
    validate(not_empty, len_char_max = 8),
    derive(Debug, Clone, PartialEq, Eq, AsRef, Display, Serialize, Deserialize)
)]
pub struct PosReferencePrefix(String);

/// Settings for a [`SaleEngine`](crate::SaleEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on product search results.
    pub search_limit: SearchLimit,
    /// Receipt number prefix.
    pub receipt_prefix: ReceiptPrefix,
    /// Prefix of generated till payment references.
    pub pos_reference_prefix: PosReferencePrefix,
}

impl EngineConfig {
    /// Replace the search limit.
    #[must_use]
    pub const fn with_search_limit(mut self, search_limit: SearchLimit) -> Self {
        self.search_limit = search_limit;
        self
    }

    /// Replace the receipt prefix.
    #[must_use]
    pub fn with_receipt_prefix(mut self, receipt_prefix: ReceiptPrefix) -> Self {
        self.receipt_prefix = receipt_prefix;
        self
    }

    /// Replace the till payment reference prefix.
    #[must_use]
    pub fn with_pos_reference_prefix(mut self, prefix: PosReferencePrefix) -> Self {
        self.pos_reference_prefix = prefix;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_limit: SearchLimit::default(),
            receipt_prefix: ReceiptPrefix::try_new("RCP")
                .expect("default receipt prefix should always be valid"),
            pos_reference_prefix: PosReferencePrefix::try_new("POS")
                .expect("default POS reference prefix should always be valid"),
        }
    }
}
