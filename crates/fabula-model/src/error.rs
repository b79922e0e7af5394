// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

use crate::Category;

/// The only conditions that propagate as errors.
///
/// Everything else adverse (budget exhaustion, malformed or empty text,
/// missing optional categories) degrades gracefully and is recorded in the
/// audit instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    /// No provider supplied any CORE section.  A bundle without core
    /// instructions must never reach the model.
    #[error("no CORE section was supplied by any provider")]
    MissingCore,

    /// Internal invariant violation: the assembled sequence is not in
    /// non-decreasing category order.
    #[error("category ordering violated at section '{key}': {found} after {previous}")]
    OrderingViolation {
        key: String,
        found: Category,
        previous: Category,
    },
}
