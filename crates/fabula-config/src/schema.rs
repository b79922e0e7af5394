// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

fn default_max_input_tokens() -> usize {
    8_000
}

fn default_warn_ratio() -> f32 {
    0.90
}

fn default_state_entry_cap() -> usize {
    10
}

fn default_compact_fill_ratio() -> f32 {
    0.8
}

fn default_min_sentence_len() -> usize {
    20
}

fn default_max_key_points() -> usize {
    5
}

/// Top-level configuration file shape for the surrounding service.
///
/// The engine itself never reads this from disk or from the environment;
/// the service loads it once (see [`crate::load`]) and injects the
/// [`BudgetConfig`] into each assembly call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub budget: BudgetConfig,
}

/// Token-budget knobs injected into the allocator at call time.
///
/// Plain data, no ambient state: the same config and the same inputs must
/// produce byte-identical output across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Hard token ceiling for the assembled input.
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    /// Fraction of the budget at which a warn-only notice is emitted.
    #[serde(default = "default_warn_ratio")]
    pub warn_ratio: f32,
    /// Maximum surviving volatile state entries (top-N by salience).
    #[serde(default = "default_state_entry_cap")]
    pub state_entry_cap: usize,
    /// Fraction of a compaction ceiling the sentence-fill phase may use.
    #[serde(default = "default_compact_fill_ratio")]
    pub compact_fill_ratio: f32,
    /// Sentences at or below this length are skipped by the compactor.
    #[serde(default = "default_min_sentence_len")]
    pub min_sentence_len: usize,
    /// Maximum key points the compactor extracts per block.
    #[serde(default = "default_max_key_points")]
    pub max_key_points: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_input_tokens: default_max_input_tokens(),
            warn_ratio: default_warn_ratio(),
            state_entry_cap: default_state_entry_cap(),
            compact_fill_ratio: default_compact_fill_ratio(),
            min_sentence_len: default_min_sentence_len(),
            max_key_points: default_max_key_points(),
        }
    }
}

impl BudgetConfig {
    /// Preset for large-context models (32K+ input windows).
    pub fn large_context() -> Self {
        Self {
            max_input_tokens: 24_000,
            state_entry_cap: 30,
            ..Self::default()
        }
    }

    /// Preset for very limited local models.
    pub fn minimal() -> Self {
        Self {
            max_input_tokens: 2_000,
            state_entry_cap: 5,
            ..Self::default()
        }
    }

    /// Reject configurations the allocator cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_input_tokens == 0 {
            anyhow::bail!("max_input_tokens must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.warn_ratio) {
            anyhow::bail!("warn_ratio must be within 0.0..=1.0, got {}", self.warn_ratio);
        }
        if !(0.0..=1.0).contains(&self.compact_fill_ratio) {
            anyhow::bail!(
                "compact_fill_ratio must be within 0.0..=1.0, got {}",
                self.compact_fill_ratio
            );
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
