// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed-precedence content class for bundle sections.
///
/// The discriminant is the precedence: the lowest value is the highest
/// precedence and is dropped last (or never).  The order is total and fixed
/// for the lifetime of the system; `Ord` follows the discriminant, so a
/// sorted section list is automatically in bundle order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Category {
    /// System / core instructions.  Mandatory; assembly fails without it.
    Core = 0,
    /// Game ruleset text.
    Ruleset = 1,
    /// Optional rule modules and expansions.
    Modules = 2,
    /// World / setting description.
    World = 3,
    /// The selected scenario document.
    Scenario = 4,
    /// NPC biographies and entity references.
    Npcs = 5,
    /// Live game state (episodic memory log, inventories, flags).
    State = 6,
    /// The player's input for the current turn.
    Input = 7,
}

impl Category {
    /// Every category, in precedence order.
    pub const ALL: [Category; 8] = [
        Category::Core,
        Category::Ruleset,
        Category::Modules,
        Category::World,
        Category::Scenario,
        Category::Npcs,
        Category::State,
        Category::Input,
    ];

    /// The optional categories, in the order the allocator drops them.
    pub const DROP_ORDER: [Category; 4] = [
        Category::Scenario,
        Category::Npcs,
        Category::State,
        Category::Input,
    ];

    /// Numeric precedence (0 = highest, dropped last).
    pub fn order(self) -> u8 {
        self as u8
    }

    /// Protected categories are never dropped by the allocator and are
    /// truncated only as an absolute last resort, never to zero.
    pub fn is_protected(self) -> bool {
        matches!(self, Category::Core | Category::Ruleset | Category::World)
    }

    /// Human-readable heading used when rendering a bundle.
    pub fn label(self) -> &'static str {
        match self {
            Category::Core => "Core Instructions",
            Category::Ruleset => "Ruleset",
            Category::Modules => "Rule Modules",
            Category::World => "World",
            Category::Scenario => "Scenario",
            Category::Npcs => "Characters",
            Category::State => "Game State",
            Category::Input => "Player Input",
        }
    }
}

impl fmt::Display for Category {
    /// Canonical tag form, used in policy actions and audit output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Category::Core => "CORE",
            Category::Ruleset => "RULESET",
            Category::Modules => "MODULES",
            Category::World => "WORLD",
            Category::Scenario => "SCENARIO",
            Category::Npcs => "NPCS",
            Category::State => "STATE",
            Category::Input => "INPUT",
        };
        f.write_str(tag)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
