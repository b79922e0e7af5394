// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

use fabula_model::Section;
use tracing::debug;

/// Remove duplicate entity references across sources.
///
/// For every `entity_key`, exactly one section survives: the occurrence
/// with the highest-precedence (lowest-order) source category wins, and
/// ties within the same category go to the lexicographically smallest
/// section key.  Within each category, plain sections keep their assembled
/// order and entity-bearing survivors follow in ascending entity-key order,
/// so the output is fully deterministic and the pass is idempotent.
pub fn dedupe(sections: Vec<Section>) -> Vec<Section> {
    // entity key → (category order, section key) of the current survivor
    let mut survivors: BTreeMap<&str, (u8, &str)> = BTreeMap::new();
    for section in &sections {
        let Some(entity) = section.entity_key.as_deref() else {
            continue;
        };
        let rank = (section.category.order(), section.key.as_str());
        match survivors.get(entity) {
            Some(best) if *best <= rank => {}
            _ => {
                survivors.insert(entity, rank);
            }
        }
    }

    let duplicates = sections
        .iter()
        .filter(|s| s.entity_key.is_some())
        .count()
        .saturating_sub(survivors.len());
    if duplicates > 0 {
        debug!(duplicates, "deduplicated entity references");
    }

    // Rebuild per category: plain sections in assembled order, then the
    // surviving entity sections in ascending entity-key order.
    let survivors: BTreeMap<String, (u8, String)> = survivors
        .into_iter()
        .map(|(k, (o, key))| (k.to_string(), (o, key.to_string())))
        .collect();

    let mut out: Vec<Section> = Vec::with_capacity(sections.len());
    let mut pending_entities: Vec<Section> = Vec::new();
    let mut current_category = None;

    let flush =
        |pending: &mut Vec<Section>, out: &mut Vec<Section>| {
            pending.sort_by(|a, b| a.entity_key.cmp(&b.entity_key));
            out.append(pending);
        };

    for section in sections {
        if current_category != Some(section.category) {
            flush(&mut pending_entities, &mut out);
            current_category = Some(section.category);
        }
        match section.entity_key.as_deref() {
            None => out.push(section),
            Some(entity) => {
                let keep = survivors.get(entity).is_some_and(|(order, key)| {
                    *order == section.category.order() && *key == section.key
                });
                if keep {
                    pending_entities.push(section);
                }
            }
        }
    }
    flush(&mut pending_entities, &mut out);
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
