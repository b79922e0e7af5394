// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

//! Token-budgeted prompt bundle assembly for LLM game turns.
//!
//! Every model call in a turn-based game loop carries a bundle of ordered
//! sections: core instructions, ruleset, mechanics modules, world lore,
//! scenario, NPCs, volatile state, player input.  This crate assembles that
//! bundle from pluggable providers, deduplicates entity references across
//! them, and fits the result to a hard token budget with a deterministic
//! cascading reduction policy that protects the categories the model cannot
//! function without.
//!
//! The typical call site needs exactly one entry point:
//!
//! ```no_run
//! use fabula::{build_bundle, AssemblyContext, BudgetConfig, ByteRatio};
//! # fn providers() -> Vec<&'static dyn fabula::SectionProvider> { vec![] }
//!
//! let cfg = BudgetConfig::default();
//! let (bundle, audit) =
//!     build_bundle(&providers(), &AssemblyContext::default(), &cfg, &ByteRatio)?;
//! let prompt = bundle.render();
//! # let _ = (prompt, audit);
//! # Ok::<(), fabula::AssemblyError>(())
//! ```
//!
//! Budget exhaustion is never an error.  The bundle's outcome and the audit
//! describe every drop, trim, and warning; the only fatal conditions are a
//! missing CORE section and a category ordering violation.

pub use fabula_config::{load, BudgetConfig, Config};
pub use fabula_engine::{
    assemble, build_bundle, compact, dedupe, estimate_sections, trim_linear, verify_order,
    Allocation, Allocator, AssemblyContext, ByteRatio, Calibrated, CompactMeta, CompactOptions,
    CompactStrategy, Compacted, LinearSection, LinearTrim, SectionProvider, TokenEstimator,
};
pub use fabula_model::{
    AssemblyError, Audit, AuditEntry, Bundle, BudgetOutcome, Category, DropReason, DroppedEntry,
    PolicyAction, Section, SectionKind, Slot, TokenEstimate, Trim, Warning,
};
