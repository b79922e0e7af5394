// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fmt;

use serde::{Serialize, Serializer};

use crate::Category;

/// One trim record: a section that was removed or shortened, and by how much.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trim {
    pub key: String,
    pub removed_chars: usize,
    pub removed_tokens: usize,
}

/// Non-fatal condition surfaced by the allocator.
///
/// Budget exhaustion is never an error; it is data the caller inspects to
/// decide whether to proceed, retry with a larger budget, or reject.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tag")]
pub enum Warning {
    /// The estimate reached the warn threshold (default 90%) without
    /// exceeding the budget.  Nothing was dropped.
    #[serde(rename = "POLICY_UNDECIDED")]
    NearBudget { pct: u8 },
    /// A protected-category section had to be truncated as a last resort.
    #[serde(rename = "PROTECTED_TRUNCATED")]
    ProtectedTruncated { key: String },
    /// Every reduction stage ran and the bundle still exceeds the budget.
    #[serde(rename = "BUDGET_EXCEEDED_AFTER_ALL_REDUCTIONS")]
    BudgetExceeded,
}

impl Warning {
    /// Stable tag for log matching and telemetry.
    pub fn tag(&self) -> &'static str {
        match self {
            Warning::NearBudget { .. } => "POLICY_UNDECIDED",
            Warning::ProtectedTruncated { .. } => "PROTECTED_TRUNCATED",
            Warning::BudgetExceeded => "BUDGET_EXCEEDED_AFTER_ALL_REDUCTIONS",
        }
    }
}

/// One reduction decision made by the allocator, in application order.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyAction {
    /// An additive pre-rendered summary or slice was discarded.
    SummaryDropped { key: String },
    /// A whole section of an optional category was dropped.
    CategoryDropped { category: Category, key: String },
    /// One NPC entity was dropped from the character roster.
    NpcDropped { key: String },
    /// The volatile state log was capped to its top-N entries.
    StateCapped { kept: usize },
    /// Last-resort proportional byte truncation of the remainder.
    ProportionalTruncation,
}

impl PolicyAction {
    /// Canonical tag form (`SCENARIO_DROPPED`, `NPC_DROPPED`, ...).
    pub fn tag(&self) -> String {
        match self {
            PolicyAction::SummaryDropped { .. } => "SUMMARY_DROPPED".to_string(),
            PolicyAction::CategoryDropped { category, .. } => format!("{category}_DROPPED"),
            PolicyAction::NpcDropped { .. } => "NPC_DROPPED".to_string(),
            PolicyAction::StateCapped { .. } => "STATE_CAPPED".to_string(),
            PolicyAction::ProportionalTruncation => "PROPORTIONAL_TRUNCATION".to_string(),
        }
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

impl Serialize for PolicyAction {
    /// The audit's `policy` field is an ordered list of tags.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.tag())
    }
}

/// Why a section was removed from the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    AdditiveContent,
    CategoryBudget,
    NpcBudget,
    StateCap,
}

/// A surviving section, identified for the telemetry sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub key: String,
    pub category: Category,
}

/// A removed section plus the reason it was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedEntry {
    pub key: String,
    pub category: Category,
    pub reason: DropReason,
}

/// Input size relative to the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenEstimate {
    /// Estimated tokens of the assembled input, before reduction.
    pub input: usize,
    pub budget: usize,
    /// `input` as an integer percentage of `budget`.
    pub pct: u32,
}

impl TokenEstimate {
    pub fn new(input: usize, budget: usize) -> Self {
        let pct = if budget == 0 {
            0
        } else {
            (input * 100 / budget) as u32
        };
        Self { input, budget, pct }
    }
}

/// Structured explanation of one assembly call.
///
/// Constructed fresh per call, returned by value, and never mutated after
/// being returned.  The caller emits it to its telemetry sink and discards
/// it; nothing in this crate persists or logs it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Audit {
    pub included: Vec<AuditEntry>,
    pub dropped: Vec<DroppedEntry>,
    /// Ordered list of policy-action tags applied.
    pub policy: Vec<PolicyAction>,
    pub token_est: TokenEstimate,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
