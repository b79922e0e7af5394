// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::cmp::Reverse;

use fabula_config::BudgetConfig;
use fabula_model::{
    Category, DropReason, DroppedEntry, PolicyAction, Section, Trim, Warning,
};
use serde::Serialize;
use tracing::debug;

use crate::{estimate_sections, ByteRatio, TokenEstimator};

/// Result of one allocation pass.
///
/// The allocator never errors: budget exhaustion, protected-category
/// truncation, and every other adverse condition are surfaced here as data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub sections: Vec<Section>,
    pub total_tokens_before: usize,
    pub total_tokens_after: usize,
    pub trims: Vec<Trim>,
    pub warnings: Vec<Warning>,
    /// Ordered list of reduction decisions, in application order.
    pub policy: Vec<PolicyAction>,
    /// Sections removed outright, with the reason.
    pub dropped: Vec<DroppedEntry>,
    pub within_budget: bool,
}

impl Allocation {
    pub fn tokens_saved(&self) -> usize {
        self.total_tokens_before
            .saturating_sub(self.total_tokens_after)
    }
}

/// Working state threaded through the reduction stages.
struct AllocState {
    sections: Vec<Section>,
    trims: Vec<Trim>,
    policy: Vec<PolicyAction>,
    dropped: Vec<DroppedEntry>,
    warnings: Vec<Warning>,
}

impl AllocState {
    fn total(&self, est: &dyn TokenEstimator) -> usize {
        estimate_sections(&self.sections, est)
    }

    fn fits(&self, budget: usize, est: &dyn TokenEstimator) -> bool {
        self.total(est) <= budget
    }

    /// Remove a whole section, recording the trim and the drop reason.
    fn remove(&mut self, index: usize, reason: DropReason, est: &dyn TokenEstimator) -> Section {
        let section = self.sections.remove(index);
        self.trims.push(Trim {
            key: section.key.clone(),
            removed_chars: section.text.len(),
            removed_tokens: est.estimate(&section.text),
        });
        self.dropped.push(DroppedEntry {
            key: section.key.clone(),
            category: section.category,
            reason,
        });
        section
    }
}

/// One step of the cascading reduction policy.
///
/// Stages are pure over the working state: each frees as many tokens as its
/// rule allows and returns; the cascade stops as soon as the bundle fits.
trait ReductionStage {
    fn name(&self) -> &'static str;
    fn apply(
        &self,
        state: &mut AllocState,
        budget: usize,
        est: &dyn TokenEstimator,
        cfg: &BudgetConfig,
    );
}

/// Stage a: discard additive pre-rendered summaries and inline slices.
struct DropAdditive;

impl ReductionStage for DropAdditive {
    fn name(&self) -> &'static str {
        "drop_additive"
    }

    fn apply(
        &self,
        state: &mut AllocState,
        budget: usize,
        est: &dyn TokenEstimator,
        _cfg: &BudgetConfig,
    ) {
        // Lowest-precedence additive content goes first.
        loop {
            if state.fits(budget, est) {
                return;
            }
            let Some(index) = state
                .sections
                .iter()
                .rposition(|s| s.kind.is_additive() && !s.is_must_keep())
            else {
                return;
            };
            let section = state.remove(index, DropReason::AdditiveContent, est);
            state.policy.push(PolicyAction::SummaryDropped {
                key: section.key,
            });
        }
    }
}

/// Stage b: drop one whole optional category section at a time.
///
/// State sections go least-salient-first so the most important log entries
/// are the last to leave; other categories drop in reverse declared order.
struct DropCategory(Category);

impl DropCategory {
    fn next_victim(&self, state: &AllocState) -> Option<usize> {
        let candidates: Vec<usize> = state
            .sections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.category == self.0 && !s.is_must_keep())
            .map(|(i, _)| i)
            .collect();
        if self.0 == Category::State {
            candidates.into_iter().min_by(|&a, &b| {
                let sa = &state.sections[a];
                let sb = &state.sections[b];
                salience_of(sa)
                    .total_cmp(&salience_of(sb))
                    .then_with(|| sa.timestamp.cmp(&sb.timestamp))
                    .then_with(|| sa.key.cmp(&sb.key))
            })
        } else {
            candidates.into_iter().last()
        }
    }
}

impl ReductionStage for DropCategory {
    fn name(&self) -> &'static str {
        "drop_category"
    }

    fn apply(
        &self,
        state: &mut AllocState,
        budget: usize,
        est: &dyn TokenEstimator,
        _cfg: &BudgetConfig,
    ) {
        debug_assert!(!self.0.is_protected());
        loop {
            if state.fits(budget, est) {
                return;
            }
            let Some(index) = self.next_victim(state) else {
                return;
            };
            let section = state.remove(index, DropReason::CategoryBudget, est);
            state.policy.push(PolicyAction::CategoryDropped {
                category: self.0,
                key: section.key,
            });
        }
    }
}

/// Stage b': drop NPC entities one at a time, lowest priority first.
///
/// An explicit `slot.priority` wins (ascending = dropped first); otherwise
/// the roster's declared order decides and the last-declared NPC leaves
/// first.
struct DropNpcs;

impl ReductionStage for DropNpcs {
    fn name(&self) -> &'static str {
        "drop_npcs"
    }

    fn apply(
        &self,
        state: &mut AllocState,
        budget: usize,
        est: &dyn TokenEstimator,
        _cfg: &BudgetConfig,
    ) {
        loop {
            if state.fits(budget, est) {
                return;
            }
            let victim = state
                .sections
                .iter()
                .enumerate()
                .filter(|(_, s)| s.category == Category::Npcs && !s.is_must_keep())
                .min_by_key(|(_, s)| {
                    let priority = s.slot.as_ref().and_then(|sl| sl.priority);
                    (
                        priority.unwrap_or(i32::MAX),
                        Reverse(s.sub_order),
                        Reverse(s.key.clone()),
                    )
                })
                .map(|(i, _)| i);
            let Some(index) = victim else {
                return;
            };
            let section = state.remove(index, DropReason::NpcBudget, est);
            state.policy.push(PolicyAction::NpcDropped {
                key: section.entity_key.unwrap_or(section.key),
            });
        }
    }
}

/// Stage c: cap volatile state to the top-N entries by salience, recency as
/// tie-break.
struct CapState;

impl ReductionStage for CapState {
    fn name(&self) -> &'static str {
        "cap_state"
    }

    fn apply(
        &self,
        state: &mut AllocState,
        budget: usize,
        est: &dyn TokenEstimator,
        cfg: &BudgetConfig,
    ) {
        if state.fits(budget, est) {
            return;
        }
        let mut entries: Vec<usize> = state
            .sections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.category == Category::State && !s.is_must_keep())
            .map(|(i, _)| i)
            .collect();
        if entries.len() <= cfg.state_entry_cap {
            return;
        }
        // Rank: salience descending, then timestamp descending, then key.
        entries.sort_by(|&a, &b| {
            let sa = &state.sections[a];
            let sb = &state.sections[b];
            salience_of(sb)
                .total_cmp(&salience_of(sa))
                .then_with(|| sb.timestamp.cmp(&sa.timestamp))
                .then_with(|| sa.key.cmp(&sb.key))
        });
        let mut doomed: Vec<usize> = entries.split_off(cfg.state_entry_cap);
        // Remove from the back so earlier indices stay valid.
        doomed.sort_unstable_by_key(|&i| Reverse(i));
        for index in doomed {
            state.remove(index, DropReason::StateCap, est);
        }
        state.policy.push(PolicyAction::StateCapped {
            kept: cfg.state_entry_cap,
        });
    }
}

/// Stage d: last-resort proportional byte truncation of the remainder.
///
/// Non-protected sections are shaved toward their slot floors first;
/// protected categories (CORE, RULESET, WORLD) are touched only when
/// literally nothing else can give, each such cut flagged as a hard-fail
/// warning, and never truncated to zero.
struct ProportionalTruncate;

impl ReductionStage for ProportionalTruncate {
    fn name(&self) -> &'static str {
        "proportional_truncate"
    }

    fn apply(
        &self,
        state: &mut AllocState,
        budget: usize,
        est: &dyn TokenEstimator,
        _cfg: &BudgetConfig,
    ) {
        let mut acted = false;
        // Bounded passes: per-section ceil rounding can leave a few tokens
        // of excess after one sweep.
        for _ in 0..4 {
            let total = state.total(est);
            if total <= budget {
                break;
            }
            let needed = (total - budget) * ByteRatio::BYTES_PER_TOKEN;
            if proportional_pass(state, est, needed, false) > 0 {
                acted = true;
                continue;
            }
            if proportional_pass(state, est, needed, true) > 0 {
                acted = true;
                continue;
            }
            break;
        }
        if acted {
            state.policy.push(PolicyAction::ProportionalTruncation);
        }
    }
}

fn salience_of(section: &Section) -> f32 {
    section.salience.unwrap_or(f32::NEG_INFINITY)
}

/// One proportional sweep over either the non-protected or the protected
/// half of the bundle.  Returns the number of bytes removed.
fn proportional_pass(
    state: &mut AllocState,
    est: &dyn TokenEstimator,
    needed_bytes: usize,
    protected: bool,
) -> usize {
    let mut candidates: Vec<(usize, usize)> = Vec::new();
    let mut available_total = 0usize;
    for (i, s) in state.sections.iter().enumerate() {
        if s.category.is_protected() != protected {
            continue;
        }
        // Protected text may shrink but never disappear.
        let floor = if protected {
            s.min_chars().max(1)
        } else {
            s.min_chars()
        };
        let floor = floor.min(s.text.len());
        let available = s.text.len() - floor;
        if available > 0 {
            candidates.push((i, floor));
            available_total += available;
        }
    }
    if available_total == 0 {
        return 0;
    }

    let ratio = (needed_bytes as f64 / available_total as f64).min(1.0);
    let mut removed_total = 0usize;
    for (index, floor) in candidates {
        let section = &mut state.sections[index];
        let old_len = section.text.len();
        let available = old_len - floor;
        let cut = ((available as f64) * ratio).ceil() as usize;
        let mut target = old_len.saturating_sub(cut).max(floor);
        // Respect UTF-8 boundaries without dipping below the floor.
        while target < old_len && !section.text.is_char_boundary(target) {
            target += 1;
        }
        if target >= old_len {
            continue;
        }
        let old_tokens = est.estimate(&section.text);
        section.text.truncate(target);
        let key = section.key.clone();
        state.trims.push(Trim {
            key: key.clone(),
            removed_chars: old_len - target,
            removed_tokens: old_tokens.saturating_sub(est.estimate(&state.sections[index].text)),
        });
        if protected
            && !state.warnings.iter().any(
                |w| matches!(w, Warning::ProtectedTruncated { key: k } if *k == key),
            )
        {
            state.warnings.push(Warning::ProtectedTruncated { key });
        }
        removed_total += old_len - target;
    }
    removed_total
}

/// Fits an assembled section sequence to a token budget with the
/// deterministic cascading reduction policy.
pub struct Allocator<'a> {
    cfg: &'a BudgetConfig,
    est: &'a dyn TokenEstimator,
}

impl<'a> Allocator<'a> {
    pub fn new(cfg: &'a BudgetConfig, est: &'a dyn TokenEstimator) -> Self {
        Self { cfg, est }
    }

    /// Apply the reduction cascade.  Never errors; the outcome carries every
    /// decision made and whether the result fits.
    pub fn allocate(&self, sections: Vec<Section>) -> Allocation {
        let budget = self.cfg.max_input_tokens;
        let total_before = estimate_sections(&sections, self.est);
        let mut state = AllocState {
            sections,
            trims: Vec::new(),
            policy: Vec::new(),
            dropped: Vec::new(),
            warnings: Vec::new(),
        };

        if total_before <= budget {
            // Warn-only band: close to the ceiling but nothing to decide yet.
            if budget > 0 && (total_before as f64 / budget as f64) >= self.cfg.warn_ratio as f64 {
                let pct = (total_before * 100 / budget) as u8;
                debug!(tokens = total_before, budget, pct, "bundle near budget");
                state.warnings.push(Warning::NearBudget { pct });
            }
            return self.finish(state, total_before, total_before, budget);
        }

        let stages: [&dyn ReductionStage; 7] = [
            &DropAdditive,
            &DropCategory(Category::Scenario),
            &DropNpcs,
            &CapState,
            &DropCategory(Category::State),
            &DropCategory(Category::Input),
            &ProportionalTruncate,
        ];
        for stage in stages {
            if state.fits(budget, self.est) {
                break;
            }
            debug!(stage = stage.name(), "applying reduction stage");
            stage.apply(&mut state, budget, self.est, self.cfg);
        }

        let total_after = state.total(self.est);
        if total_after > budget {
            state.warnings.push(Warning::BudgetExceeded);
        }
        self.finish(state, total_before, total_after, budget)
    }

    fn finish(
        &self,
        state: AllocState,
        total_tokens_before: usize,
        total_tokens_after: usize,
        budget: usize,
    ) -> Allocation {
        Allocation {
            sections: state.sections,
            total_tokens_before,
            total_tokens_after,
            trims: state.trims,
            warnings: state.warnings,
            policy: state.policy,
            dropped: state.dropped,
            within_budget: total_tokens_after <= budget,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use fabula_model::{SectionKind, Slot};

    /// A section whose text estimates to exactly `tokens` under chars/4.
    fn sized(key: &str, category: Category, tokens: usize) -> Section {
        Section::new(key, key, "x".repeat(tokens * 4), category)
    }

    fn cfg(max_input_tokens: usize) -> BudgetConfig {
        BudgetConfig {
            max_input_tokens,
            ..BudgetConfig::default()
        }
    }

    fn allocate(sections: Vec<Section>, max_tokens: usize) -> Allocation {
        Allocator::new(&cfg(max_tokens), &ByteRatio).allocate(sections)
    }

    fn protected_triplet() -> Vec<Section> {
        vec![
            sized("core", Category::Core, 50),
            sized("ruleset", Category::Ruleset, 50),
            sized("world", Category::World, 50),
        ]
    }

    fn policy_tags(alloc: &Allocation) -> Vec<String> {
        alloc.policy.iter().map(|p| p.tag()).collect()
    }

    // -- warn-only band --

    #[test]
    fn under_threshold_is_silent() {
        let alloc = allocate(vec![sized("core", Category::Core, 100)], 1000);
        assert!(alloc.warnings.is_empty());
        assert!(alloc.within_budget);
        assert_eq!(alloc.total_tokens_after, 100);
    }

    #[test]
    fn near_budget_warns_without_dropping() {
        let mut sections = protected_triplet();
        sections.push(sized("scenario", Category::Scenario, 1700));
        // 1850 of 2000 = 92.5%
        let alloc = allocate(sections, 2000);
        assert_eq!(alloc.warnings, vec![Warning::NearBudget { pct: 92 }]);
        assert!(alloc.dropped.is_empty());
        assert!(alloc.trims.is_empty());
        assert_eq!(alloc.total_tokens_after, 1850);
    }

    // -- cascade order --

    #[test]
    fn additive_content_is_the_first_casualty() {
        let mut sections = protected_triplet();
        sections.push(
            sized("recap", Category::Scenario, 100).with_kind(SectionKind::Summary),
        );
        sections.push(sized("scenario", Category::Scenario, 60));
        // 150 + 160 over a 220 budget: dropping the recap alone suffices.
        let alloc = allocate(sections, 220);
        assert_eq!(policy_tags(&alloc), vec!["SUMMARY_DROPPED"]);
        assert!(alloc.sections.iter().any(|s| s.key == "scenario"));
        assert!(alloc.within_budget);
    }

    #[test]
    fn scenario_sample_drops_scenario_and_keeps_protected_categories() {
        // CORE 50 + RULESET 50 + WORLD 50 + SCENARIO 400 + 5 NPC x 100 = 1050
        let mut sections = protected_triplet();
        sections.push(sized("scenario", Category::Scenario, 400));
        for i in 1..=5 {
            sections.push(
                sized(&format!("npc{i}"), Category::Npcs, 100)
                    .with_sub_order(i)
                    .with_entity_key(format!("npc.{i}@1.0.0")),
            );
        }
        let alloc = allocate(sections, 700);

        assert!(policy_tags(&alloc).contains(&"SCENARIO_DROPPED".to_string()));
        for key in ["core", "ruleset", "world"] {
            assert!(alloc.sections.iter().any(|s| s.key == key), "{key} missing");
        }
        assert!(alloc.total_tokens_after <= 700);
        assert!(alloc.within_budget);
    }

    #[test]
    fn npcs_are_trimmed_lowest_priority_first_after_scenario() {
        let mut sections = protected_triplet();
        sections.push(sized("scenario", Category::Scenario, 400));
        for i in 1..=5 {
            sections.push(
                sized(&format!("npc{i}"), Category::Npcs, 100)
                    .with_sub_order(i)
                    .with_entity_key(format!("npc.{i}@1.0.0")),
            );
        }
        // 1050 total, budget 500: scenario goes, then the last two NPCs.
        let alloc = allocate(sections, 500);

        let tags = policy_tags(&alloc);
        assert!(tags.contains(&"SCENARIO_DROPPED".to_string()));
        assert_eq!(tags.iter().filter(|t| *t == "NPC_DROPPED").count(), 2);

        let survivors: Vec<&str> = alloc
            .sections
            .iter()
            .filter(|s| s.category == Category::Npcs)
            .map(|s| s.key.as_str())
            .collect();
        assert_eq!(survivors, vec!["npc1", "npc2", "npc3"]);
        assert_eq!(alloc.total_tokens_after, 450);
    }

    #[test]
    fn explicit_npc_priority_overrides_declared_order() {
        let mut sections = protected_triplet();
        for i in 1..=3 {
            sections.push(
                sized(&format!("npc{i}"), Category::Npcs, 100).with_sub_order(i),
            );
        }
        // npc1 carries the lowest explicit priority: it must go first even
        // though it was declared first.
        sections[3].slot = Some(Slot {
            name: "roster".into(),
            must_keep: false,
            min_chars: None,
            priority: Some(0),
        });
        let alloc = allocate(sections, 350);
        assert_eq!(
            alloc.dropped.iter().map(|d| d.key.as_str()).collect::<Vec<_>>(),
            vec!["npc1"]
        );
    }

    #[test]
    fn state_is_capped_by_salience_with_recency_tiebreak() {
        let mut sections = protected_triplet();
        for i in 0..15 {
            sections.push(
                sized(&format!("state{i:02}"), Category::State, 20)
                    .with_salience(i as f32)
                    .with_timestamp(Utc.with_ymd_and_hms(2026, 8, 1 + i, 12, 0, 0).unwrap()),
            );
        }
        // 150 + 300 over a 360 budget: capping to the default 10 entries
        // frees 100 tokens and makes it fit.
        let alloc = allocate(sections, 360);

        assert!(policy_tags(&alloc).contains(&"STATE_CAPPED".to_string()));
        let state_keys: Vec<&str> = alloc
            .sections
            .iter()
            .filter(|s| s.category == Category::State)
            .map(|s| s.key.as_str())
            .collect();
        assert_eq!(state_keys.len(), 10);
        // The five least salient entries (state00..state04) are gone.
        assert!(!state_keys.contains(&"state00"));
        assert!(!state_keys.contains(&"state04"));
        assert!(state_keys.contains(&"state14"));
        assert!(alloc.within_budget);
    }

    #[test]
    fn remaining_state_drops_least_salient_first_when_cap_is_not_enough() {
        let mut sections = protected_triplet();
        for i in 0..4 {
            sections.push(
                sized(&format!("state{i}"), Category::State, 50).with_salience(i as f32),
            );
        }
        // 150 + 200 over a 260 budget; cap (10) does not apply, so whole
        // entries are dropped least-salient-first.
        let alloc = allocate(sections, 260);
        let state_keys: Vec<&str> = alloc
            .sections
            .iter()
            .filter(|s| s.category == Category::State)
            .map(|s| s.key.as_str())
            .collect();
        assert_eq!(state_keys, vec!["state2", "state3"]);
        assert!(alloc.within_budget);
    }

    // -- must_keep and protected rules --

    #[test]
    fn must_keep_sections_survive_category_drops() {
        let mut sections = protected_triplet();
        sections.push(
            sized("player", Category::Input, 100)
                .with_slot(Slot::must_keep("player").with_min_chars(40)),
        );
        sections.push(sized("input.extra", Category::Input, 100));
        // 350 over a 200 budget: the extra goes entirely, the player input
        // is only truncated toward its floor.
        let alloc = allocate(sections, 200);

        assert!(alloc.dropped.iter().all(|d| d.key != "player"));
        let player = alloc.sections.iter().find(|s| s.key == "player").unwrap();
        assert!(player.text.len() >= 40);
        assert!(alloc.within_budget);
    }

    #[test]
    fn proportional_truncation_spares_protected_categories() {
        let mut sections = protected_triplet();
        sections.push(sized("modules", Category::Modules, 200));
        // Modules is neither protected nor in the optional drop order, so
        // only the proportional stage can reduce it.
        let alloc = allocate(sections, 250);

        assert!(policy_tags(&alloc).contains(&"PROPORTIONAL_TRUNCATION".to_string()));
        for key in ["core", "ruleset", "world"] {
            let s = alloc.sections.iter().find(|s| s.key == key).unwrap();
            assert_eq!(s.text.len(), 200, "{key} must be untouched");
        }
        assert!(alloc.total_tokens_after <= 250);
        assert!(alloc.within_budget);
    }

    #[test]
    fn protected_truncation_is_the_absolute_last_resort() {
        let alloc = allocate(vec![sized("core", Category::Core, 200)], 50);

        let core = &alloc.sections[0];
        assert!(!core.text.is_empty(), "protected text must never reach zero");
        assert!(core.text.len() < 800);
        assert!(alloc
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::ProtectedTruncated { key } if key == "core")));
        assert!(alloc.within_budget);
    }

    #[test]
    fn unreducible_bundle_reports_budget_exceeded() {
        let core = sized("core", Category::Core, 100)
            .with_slot(Slot::must_keep("core").with_min_chars(400));
        let alloc = allocate(vec![core], 10);

        assert!(alloc.warnings.contains(&Warning::BudgetExceeded));
        assert!(!alloc.within_budget);
        assert_eq!(alloc.total_tokens_after, alloc.total_tokens_before);
    }

    // -- global properties --

    #[test]
    fn total_after_never_exceeds_total_before() {
        let mut sections = protected_triplet();
        sections.push(sized("scenario", Category::Scenario, 300));
        sections.push(sized("npc", Category::Npcs, 120));
        for budget in [50, 200, 400, 600, 2000] {
            let alloc = allocate(sections.clone(), budget);
            assert!(alloc.total_tokens_after <= alloc.total_tokens_before);
            assert!(
                alloc.within_budget || alloc.warnings.contains(&Warning::BudgetExceeded),
                "over budget without the exceeded marker at {budget}"
            );
        }
    }

    #[test]
    fn allocation_is_deterministic() {
        let mut sections = protected_triplet();
        sections.push(sized("scenario", Category::Scenario, 400));
        for i in 1..=5 {
            sections.push(sized(&format!("npc{i}"), Category::Npcs, 100).with_sub_order(i));
        }
        let a = allocate(sections.clone(), 500);
        let b = allocate(sections, 500);
        assert_eq!(a, b);
    }

    #[test]
    fn trims_account_for_every_removed_section() {
        let mut sections = protected_triplet();
        sections.push(sized("scenario", Category::Scenario, 400));
        let alloc = allocate(sections, 200);
        let scenario_trim = alloc.trims.iter().find(|t| t.key == "scenario").unwrap();
        assert_eq!(scenario_trim.removed_chars, 1600);
        assert_eq!(scenario_trim.removed_tokens, 400);
    }
}
