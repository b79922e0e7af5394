// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Category;

/// Protection slot attached to a section.
///
/// A `must_keep` slot forbids full removal by the allocator; the section's
/// text may only be truncated toward `min_chars`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub name: String,
    pub must_keep: bool,
    /// Character floor the allocator will not truncate below.
    pub min_chars: Option<usize>,
    /// Declared priority within the category.  Lower values are reduced
    /// first when the allocator has to pick among siblings.
    pub priority: Option<i32>,
}

impl Slot {
    pub fn must_keep(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            must_keep: true,
            min_chars: None,
            priority: None,
        }
    }

    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = Some(min_chars);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// What kind of content a section carries.
///
/// `Summary` and `Slice` are purely additive pre-rendered content (recaps,
/// inline document slices) and are the first thing the allocator discards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    #[default]
    Body,
    Summary,
    Slice,
}

impl SectionKind {
    /// Additive content contributes nothing the model strictly needs.
    pub fn is_additive(self) -> bool {
        matches!(self, SectionKind::Summary | SectionKind::Slice)
    }
}

/// The atomic unit of a bundle: one labeled block of text with a category
/// and optional metadata used by dedup and the reduction stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Unique key within the bundle.
    pub key: String,
    pub label: String,
    pub text: String,
    pub category: Category,
    #[serde(default)]
    pub kind: SectionKind,
    /// Provider-declared sub-order within the category.
    #[serde(default)]
    pub sub_order: u32,
    /// Stable entity key (e.g. `npc.kiera@1.0.0`) for dedup across sources.
    pub entity_key: Option<String>,
    pub slot: Option<Slot>,
    /// Salience score for volatile state entries (higher = more important).
    pub salience: Option<f32>,
    /// Recency timestamp for volatile state entries.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Section {
    pub fn new(
        key: impl Into<String>,
        label: impl Into<String>,
        text: impl Into<String>,
        category: Category,
    ) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            text: text.into(),
            category,
            kind: SectionKind::Body,
            sub_order: 0,
            entity_key: None,
            slot: None,
            salience: None,
            timestamp: None,
        }
    }

    pub fn with_kind(mut self, kind: SectionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_sub_order(mut self, sub_order: u32) -> Self {
        self.sub_order = sub_order;
        self
    }

    pub fn with_entity_key(mut self, entity_key: impl Into<String>) -> Self {
        self.entity_key = Some(entity_key.into());
        self
    }

    pub fn with_slot(mut self, slot: Slot) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn with_salience(mut self, salience: f32) -> Self {
        self.salience = Some(salience);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// True when the allocator may never remove this section outright.
    pub fn is_must_keep(&self) -> bool {
        self.slot.as_ref().is_some_and(|s| s.must_keep)
    }

    /// The character floor the allocator must respect when truncating.
    pub fn min_chars(&self) -> usize {
        match &self.slot {
            Some(slot) if slot.must_keep => slot.min_chars.unwrap_or(1),
            Some(slot) => slot.min_chars.unwrap_or(0),
            None => 0,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
