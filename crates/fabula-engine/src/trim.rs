// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use fabula_model::{Slot, Trim, Warning};
use serde::Serialize;
use tracing::debug;

use crate::{ByteRatio, TokenEstimator};

/// One section of a flat, precedence-ordered document.
///
/// This is the category-free counterpart of the bundle model, for callers
/// that fit arbitrary linear content (tool manifests, lore digests) to a
/// budget without the game-turn category policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinearSection {
    pub key: String,
    pub label: String,
    pub text: String,
    /// Reduction precedence.  Lower values are reduced first.
    pub precedence: u32,
    /// Tie-break among equal precedences.  Lower values are reduced first.
    pub priority: i32,
    pub slot: Option<Slot>,
}

impl LinearSection {
    pub fn new(key: impl Into<String>, label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            text: text.into(),
            precedence: 0,
            priority: 0,
            slot: None,
        }
    }

    pub fn with_precedence(mut self, precedence: u32) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_slot(mut self, slot: Slot) -> Self {
        self.slot = Some(slot);
        self
    }

    fn is_must_keep(&self) -> bool {
        self.slot.as_ref().is_some_and(|s| s.must_keep)
    }

    fn min_chars(&self) -> usize {
        match &self.slot {
            Some(slot) if slot.must_keep => slot.min_chars.unwrap_or(1),
            Some(slot) => slot.min_chars.unwrap_or(0),
            None => 0,
        }
    }
}

/// Outcome of [`trim_linear`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinearTrim {
    pub sections: Vec<LinearSection>,
    pub total_tokens_before: usize,
    pub total_tokens_after: usize,
    pub trims: Vec<Trim>,
    pub warnings: Vec<Warning>,
}

impl LinearTrim {
    pub fn within_budget(&self, max_tokens: usize) -> bool {
        self.total_tokens_after <= max_tokens
    }
}

/// Fit a flat section sequence to `max_tokens`.
///
/// Sections are removed whole in ascending `(precedence, priority, key)`
/// order until the sequence fits.  `must_keep` sections are never removed;
/// once only those remain they are truncated toward their `min_chars`
/// floors, lowest precedence first.  When nothing more can give, the result
/// carries a budget-exceeded warning instead of an error.  Survivor order
/// is the input order.
pub fn trim_linear(
    sections: Vec<LinearSection>,
    max_tokens: usize,
    est: &dyn TokenEstimator,
) -> LinearTrim {
    let total = |sections: &[LinearSection]| -> usize {
        sections.iter().map(|s| est.estimate(&s.text)).sum()
    };

    let total_tokens_before = total(&sections);
    let mut sections = sections;
    let mut trims: Vec<Trim> = Vec::new();
    let mut warnings: Vec<Warning> = Vec::new();

    // Whole-section removal, lowest precedence first.
    while total(&sections) > max_tokens {
        let victim = sections
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_must_keep())
            .min_by(|(_, a), (_, b)| {
                (a.precedence, a.priority, &a.key).cmp(&(b.precedence, b.priority, &b.key))
            })
            .map(|(i, _)| i);
        let Some(index) = victim else {
            break;
        };
        let removed = sections.remove(index);
        debug!(key = %removed.key, "removed linear section");
        trims.push(Trim {
            key: removed.key,
            removed_chars: removed.text.len(),
            removed_tokens: est.estimate(&removed.text),
        });
    }

    // Truncation of the protected remainder toward the floors.
    let mut order: Vec<usize> = (0..sections.len()).collect();
    order.sort_by(|&a, &b| {
        let (sa, sb) = (&sections[a], &sections[b]);
        (sa.precedence, sa.priority, &sa.key).cmp(&(sb.precedence, sb.priority, &sb.key))
    });
    for index in order {
        let excess = total(&sections).saturating_sub(max_tokens);
        if excess == 0 {
            break;
        }
        let section = &mut sections[index];
        let floor = section.min_chars().min(section.text.len());
        let available = section.text.len() - floor;
        if available == 0 {
            continue;
        }
        let cut = (excess * ByteRatio::BYTES_PER_TOKEN).min(available);
        let mut target = section.text.len() - cut;
        while target < section.text.len() && !section.text.is_char_boundary(target) {
            target += 1;
        }
        if target >= section.text.len() {
            continue;
        }
        let old_len = section.text.len();
        let old_tokens = est.estimate(&section.text);
        section.text.truncate(target);
        trims.push(Trim {
            key: section.key.clone(),
            removed_chars: old_len - target,
            removed_tokens: old_tokens.saturating_sub(est.estimate(&section.text)),
        });
    }

    let total_tokens_after = total(&sections);
    if total_tokens_after > max_tokens {
        warnings.push(Warning::BudgetExceeded);
    }

    LinearTrim {
        sections,
        total_tokens_before,
        total_tokens_after,
        trims,
        warnings,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
