// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod category;
mod section;
mod audit;
mod bundle;
mod error;

pub use category::Category;
pub use section::{Section, SectionKind, Slot};
pub use audit::{Audit, AuditEntry, DropReason, DroppedEntry, PolicyAction, TokenEstimate, Trim, Warning};
pub use bundle::{Bundle, BudgetOutcome};
pub use error::AssemblyError;
