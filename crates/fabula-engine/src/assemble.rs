// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

use fabula_model::{AssemblyError, Category, Section};
use tracing::debug;

use crate::dedupe;

/// Opaque per-request data forwarded to every provider.
///
/// Providers fetch their documents before assembly begins; this context only
/// carries identifiers and pre-resolved values, never handles for I/O.
#[derive(Debug, Clone, Default)]
pub struct AssemblyContext {
    pub request_id: Option<String>,
    /// Arbitrary request variables (player id, scenario ref, ...).  A
    /// `BTreeMap` keeps iteration deterministic.
    pub vars: BTreeMap<String, String>,
}

/// One content source (core instructions, ruleset, scenario, NPC roster...).
///
/// The engine treats providers as opaque: each supplies zero or more
/// sections tagged with its category, and supplying none is not an error.
pub trait SectionProvider {
    fn category(&self) -> Category;
    fn sections(&self, ctx: &AssemblyContext) -> Vec<Section>;
}

/// Merge all providers into one strictly ordered section sequence.
///
/// Sections are stable-sorted by `(category, sub_order, key)`, entity
/// duplicates are removed, and the result is verified to be in
/// non-decreasing category order.  Missing optional categories are simply
/// omitted; a missing CORE section is the one fatal input error.
pub fn assemble(
    providers: &[&dyn SectionProvider],
    ctx: &AssemblyContext,
) -> Result<Vec<Section>, AssemblyError> {
    let mut sections: Vec<Section> = Vec::new();
    for provider in providers {
        let supplied = provider.sections(ctx);
        debug!(
            category = %provider.category(),
            count = supplied.len(),
            "collected provider sections"
        );
        sections.extend(supplied);
    }

    sections.sort_by(|a, b| {
        (a.category, a.sub_order, &a.key).cmp(&(b.category, b.sub_order, &b.key))
    });

    let sections = dedupe(sections);

    if !sections.iter().any(|s| s.category == Category::Core) {
        return Err(AssemblyError::MissingCore);
    }

    verify_order(&sections)?;
    Ok(sections)
}

/// Scan for the non-decreasing category invariant.
///
/// Holds by construction after [`assemble`]; exposed so callers and tests
/// can re-verify any section sequence they hand to the allocator.
pub fn verify_order(sections: &[Section]) -> Result<(), AssemblyError> {
    for pair in sections.windows(2) {
        if pair[1].category < pair[0].category {
            return Err(AssemblyError::OrderingViolation {
                key: pair[1].key.clone(),
                found: pair[1].category,
                previous: pair[0].category,
            });
        }
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
