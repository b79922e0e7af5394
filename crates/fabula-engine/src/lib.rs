// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod estimate;
mod compact;
mod dedupe;
mod assemble;
mod allocate;
mod trim;
mod pipeline;

pub use estimate::{estimate_sections, ByteRatio, Calibrated, TokenEstimator};
pub use compact::{compact, CompactMeta, CompactOptions, CompactStrategy, Compacted};
pub use dedupe::dedupe;
pub use assemble::{assemble, verify_order, AssemblyContext, SectionProvider};
pub use allocate::{Allocation, Allocator};
pub use trim::{trim_linear, LinearSection, LinearTrim};
pub use pipeline::build_bundle;
