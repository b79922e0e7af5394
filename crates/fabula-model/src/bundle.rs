// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::Serialize;

use crate::{Section, Trim, Warning};

/// Accounting attached to a finished bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetOutcome {
    pub total_tokens_before: usize,
    pub total_tokens_after: usize,
    pub trims: Vec<Trim>,
    pub warnings: Vec<Warning>,
    /// False only when `warnings` contains the budget-exceeded marker.
    pub within_budget: bool,
}

impl BudgetOutcome {
    pub fn tokens_saved(&self) -> usize {
        self.total_tokens_before
            .saturating_sub(self.total_tokens_after)
    }
}

/// The ordered, budget-fitted set of sections sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bundle {
    pub sections: Vec<Section>,
    pub outcome: BudgetOutcome,
}

impl Bundle {
    /// Render the bundle to the text handed to the model provider.
    ///
    /// Sections are joined with blank lines; empty texts (fully truncated
    /// last-resort survivors) are skipped so the output stays clean.
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .filter(|s| !s.text.is_empty())
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
