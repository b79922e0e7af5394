// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use fabula_config::BudgetConfig;
use fabula_model::{Audit, AuditEntry, AssemblyError, Bundle, BudgetOutcome, TokenEstimate};
use tracing::debug;

use crate::{assemble, Allocator, AssemblyContext, SectionProvider, TokenEstimator};

/// Assemble, fit, and account for one model-call bundle.
///
/// This is the one call sites use per game turn: collect sections from the
/// providers, enforce ordering and dedup, run the budget cascade, and return
/// the renderable bundle together with a fresh audit.  The only errors are
/// the two fatal input conditions; every budget problem comes back as
/// warnings inside the outcome.
pub fn build_bundle(
    providers: &[&dyn SectionProvider],
    ctx: &AssemblyContext,
    cfg: &BudgetConfig,
    est: &dyn TokenEstimator,
) -> Result<(Bundle, Audit), AssemblyError> {
    let sections = assemble(providers, ctx)?;
    let allocation = Allocator::new(cfg, est).allocate(sections);

    debug!(
        before = allocation.total_tokens_before,
        after = allocation.total_tokens_after,
        budget = cfg.max_input_tokens,
        dropped = allocation.dropped.len(),
        within = allocation.within_budget,
        "bundle fitted"
    );

    let audit = Audit {
        included: allocation
            .sections
            .iter()
            .map(|s| AuditEntry {
                key: s.key.clone(),
                category: s.category,
            })
            .collect(),
        dropped: allocation.dropped,
        policy: allocation.policy,
        token_est: TokenEstimate::new(allocation.total_tokens_before, cfg.max_input_tokens),
    };

    let bundle = Bundle {
        sections: allocation.sections,
        outcome: BudgetOutcome {
            total_tokens_before: allocation.total_tokens_before,
            total_tokens_after: allocation.total_tokens_after,
            trims: allocation.trims,
            warnings: allocation.warnings,
            within_budget: allocation.within_budget,
        },
    };

    Ok((bundle, audit))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
